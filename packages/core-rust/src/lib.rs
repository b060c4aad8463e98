//! `tenantgate` core: tenant identifiers, authenticated principals, and the
//! session-variable protocol shared by the binder and the database policies.

pub mod session_var;
pub mod types;

pub use session_var::{TenantVariable, TenantVariableError};
pub use types::{Principal, TenantId};
