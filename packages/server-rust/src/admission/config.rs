//! Rate limit configuration for the admission limiter.

use std::time::Duration;

/// Limits for one bucket (per-IP or per-tenant).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketConfig {
    /// Requests allowed per window. Request `limit + 1` blocks the key.
    pub limit: u32,
    /// Length of the fixed counting window.
    pub window: Duration,
    /// How long a key stays blocked after exceeding the limit.
    pub block_duration: Duration,
}

impl BucketConfig {
    /// 100 requests per minute, 5 minute block.
    #[must_use]
    pub fn per_ip() -> Self {
        Self {
            limit: 100,
            window: Duration::from_secs(60),
            block_duration: Duration::from_secs(300),
        }
    }

    /// 1000 requests per minute, 5 minute block.
    #[must_use]
    pub fn per_tenant() -> Self {
        Self {
            limit: 1000,
            window: Duration::from_secs(60),
            block_duration: Duration::from_secs(300),
        }
    }

    /// Count at which the soft warning is logged (80% of `limit`, rounded up).
    #[must_use]
    pub fn warning_threshold(&self) -> u32 {
        let threshold = (u64::from(self.limit) * 80).div_ceil(100);
        u32::try_from(threshold).unwrap_or(u32::MAX)
    }
}

/// Configuration for both buckets and the background sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub ip: BucketConfig,
    pub tenant: BucketConfig,
    /// Period of the sweep that reaps expired, unblocked entries.
    /// Defaults to the IP window.
    pub sweep_interval: Duration,
    /// Also reap blocked entries whose block has already expired.
    ///
    /// Off by default: blocked keys are then only cleared by their next
    /// request or an explicit unblock.
    pub reap_expired_blocks: bool,
}

/// A [`RateLimitConfig`] field that cannot drive the limiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("rate limit {field} must be greater than zero")]
pub struct InvalidRateLimit {
    pub field: &'static str,
}

impl RateLimitConfig {
    /// Rejects zero limits, windows, block durations and sweep intervals.
    ///
    /// # Errors
    ///
    /// Names the first zero field found.
    pub fn validate(&self) -> Result<(), InvalidRateLimit> {
        let checks = [
            ("ip.limit", self.ip.limit == 0),
            ("ip.window", self.ip.window.is_zero()),
            ("ip.block_duration", self.ip.block_duration.is_zero()),
            ("tenant.limit", self.tenant.limit == 0),
            ("tenant.window", self.tenant.window.is_zero()),
            ("tenant.block_duration", self.tenant.block_duration.is_zero()),
            ("sweep_interval", self.sweep_interval.is_zero()),
        ];
        match checks.into_iter().find(|(_, zero)| *zero) {
            Some((field, _)) => Err(InvalidRateLimit { field }),
            None => Ok(()),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let ip = BucketConfig::per_ip();
        Self {
            ip,
            tenant: BucketConfig::per_tenant(),
            sweep_interval: ip.window,
            reap_expired_blocks: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_limits() {
        let config = RateLimitConfig::default();
        assert_eq!(config.ip.limit, 100);
        assert_eq!(config.tenant.limit, 1000);
        assert_eq!(config.ip.window, Duration::from_secs(60));
        assert_eq!(config.tenant.window, Duration::from_secs(60));
        assert_eq!(config.ip.block_duration, Duration::from_secs(300));
        assert_eq!(config.tenant.block_duration, Duration::from_secs(300));
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert!(!config.reap_expired_blocks);
    }

    #[test]
    fn validate_rejects_zero_durations() {
        assert_eq!(RateLimitConfig::default().validate(), Ok(()));

        let zero_window = RateLimitConfig {
            tenant: BucketConfig {
                window: Duration::ZERO,
                ..BucketConfig::per_tenant()
            },
            ..RateLimitConfig::default()
        };
        assert_eq!(zero_window.validate().unwrap_err().field, "tenant.window");

        let zero_sweep = RateLimitConfig {
            sweep_interval: Duration::ZERO,
            ..RateLimitConfig::default()
        };
        let err = zero_sweep.validate().unwrap_err();
        assert_eq!(err.to_string(), "rate limit sweep_interval must be greater than zero");
    }

    #[test]
    fn warning_threshold_rounds_up() {
        assert_eq!(BucketConfig::per_ip().warning_threshold(), 80);
        assert_eq!(BucketConfig::per_tenant().warning_threshold(), 800);
        let small = BucketConfig {
            limit: 3,
            ..BucketConfig::per_ip()
        };
        assert_eq!(small.warning_threshold(), 3);
    }
}
