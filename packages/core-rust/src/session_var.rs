//! Protocol for the session-scoped tenant variable read by row-scoping policies.
//!
//! The database exposes one custom configuration key (by default
//! `app.current_tenant_id`). Row-scoping policies compare each row's tenant
//! column against it. Binding and unbinding are ordinary statements:
//!
//! - set: `SELECT set_config('<key>', $1, false)` with the tenant as a text parameter
//! - reset: `RESET <key>`
//!
//! Any statement that itself touches the key is a *control statement* and must
//! never trigger binding logic of its own.

use regex::Regex;

/// Errors raised while building a [`TenantVariable`].
#[derive(Debug, thiserror::Error)]
pub enum TenantVariableError {
    #[error("invalid session variable key {key:?}: expected `prefix.name` of identifier characters")]
    InvalidKey { key: String },
    #[error("failed to compile control pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// A session-scoped configuration key plus the statements that set and clear it.
#[derive(Debug, Clone)]
pub struct TenantVariable {
    key: String,
    set_statement: String,
    reset_statement: String,
    control: Regex,
}

impl TenantVariable {
    /// Key used by the application's row-scoping policies.
    pub const DEFAULT_KEY: &'static str = "app.current_tenant_id";

    /// Builds the protocol for `key`.
    ///
    /// The key is interpolated into statement text, so it is restricted to a
    /// dotted pair of identifiers (the form Postgres requires for custom
    /// settings).
    ///
    /// # Errors
    ///
    /// Returns [`TenantVariableError::InvalidKey`] if `key` is not of the form
    /// `prefix.name`.
    pub fn new(key: impl Into<String>) -> Result<Self, TenantVariableError> {
        let key = key.into();
        if !is_valid_key(&key) {
            return Err(TenantVariableError::InvalidKey { key });
        }

        let escaped = regex::escape(&key);
        let control = Regex::new(&format!(
            r"(?i)\bset_config\s*\(\s*'{escaped}'|\breset\s+{escaped}\b|\bset\s+(?:session\s+|local\s+)?{escaped}\b|\bset_current_tenant\s*\("
        ))?;

        Ok(Self {
            set_statement: format!("SELECT set_config('{key}', $1, false)"),
            reset_statement: format!("RESET {key}"),
            key,
            control,
        })
    }

    /// The configuration key, e.g. `app.current_tenant_id`.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Parameterized statement binding the tenant (parameter `$1`, text).
    #[must_use]
    pub fn set_statement(&self) -> &str {
        &self.set_statement
    }

    /// Parameterless statement clearing the key.
    #[must_use]
    pub fn reset_statement(&self) -> &str {
        &self.reset_statement
    }

    /// Whether `statement` reads or writes the tenant variable directly.
    ///
    /// Reads through `current_setting(...)` are not control statements: they
    /// are regular queries and are bound like any other.
    #[must_use]
    pub fn is_control(&self, statement: &str) -> bool {
        self.control.is_match(statement)
    }
}

impl Default for TenantVariable {
    fn default() -> Self {
        Self::new(Self::DEFAULT_KEY).expect("default tenant variable key is valid")
    }
}

fn is_valid_key(key: &str) -> bool {
    let Some((prefix, name)) = key.split_once('.') else {
        return false;
    };
    is_identifier(prefix) && is_identifier(name)
}

fn is_identifier(part: &str) -> bool {
    let mut chars = part.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn default_statements() {
        let var = TenantVariable::default();
        assert_eq!(var.key(), "app.current_tenant_id");
        assert_eq!(
            var.set_statement(),
            "SELECT set_config('app.current_tenant_id', $1, false)"
        );
        assert_eq!(var.reset_statement(), "RESET app.current_tenant_id");
    }

    #[test]
    fn own_statements_are_control() {
        let var = TenantVariable::default();
        assert!(var.is_control(var.set_statement()));
        assert!(var.is_control(var.reset_statement()));
    }

    #[test]
    fn recognizes_other_control_forms() {
        let var = TenantVariable::default();
        assert!(var.is_control("select SET_CONFIG( 'app.current_tenant_id', '1', true)"));
        assert!(var.is_control("SET app.current_tenant_id = 'x'"));
        assert!(var.is_control("set local app.current_tenant_id to 'x'"));
        assert!(var.is_control("SELECT set_current_tenant('a0')"));
        assert!(var.is_control("reset app.current_tenant_id"));
    }

    #[test]
    fn ordinary_statements_are_not_control() {
        let var = TenantVariable::default();
        assert!(!var.is_control("SELECT * FROM propostas WHERE id = $1"));
        assert!(!var.is_control("SELECT current_setting('app.current_tenant_id', true)"));
        assert!(!var.is_control("SELECT set_config('statement_timeout', $1, true)"));
        assert!(!var.is_control("RESET statement_timeout"));
        assert!(!var.is_control("UPDATE faturas SET app_current = 1"));
    }

    #[test]
    fn other_keys_do_not_collide() {
        let var = TenantVariable::new("app.current_tenant_id").unwrap();
        assert!(!var.is_control("RESET app.current_tenant_id_extra"));
        assert!(!var.is_control("RESET appXcurrent_tenant_id"));
    }

    #[test]
    fn custom_key() {
        let var = TenantVariable::new("crm.empresa").unwrap();
        assert_eq!(var.reset_statement(), "RESET crm.empresa");
        assert!(var.is_control("SELECT set_config('crm.empresa', $1, false)"));
        assert!(!var.is_control("RESET app.current_tenant_id"));
    }

    #[test]
    fn rejects_invalid_keys() {
        for key in ["", "nodot", "a.b.c", "1a.b", "a.b'; DROP TABLE x; --", ".b", "a."] {
            assert!(
                matches!(
                    TenantVariable::new(key),
                    Err(TenantVariableError::InvalidKey { .. })
                ),
                "{key:?} should be rejected"
            );
        }
    }

    proptest! {
        #[test]
        fn statements_without_the_key_or_helper_are_never_control(s in "[a-zA-Z0-9_ ,()=*$]{0,80}") {
            let var = TenantVariable::default();
            prop_assume!(!s.to_ascii_lowercase().contains("set_current_tenant"));
            prop_assert!(!var.is_control(&s));
        }
    }
}
