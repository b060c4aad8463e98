//! Two-level admission: per client IP, then per tenant.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tenantgate_core::TenantId;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::bucket::{Bucket, BucketKind, BucketStats, Decision};
use super::config::RateLimitConfig;

/// Result of [`AdmissionLimiter::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Denied {
        bucket: BucketKind,
        retry_after: Duration,
    },
}

impl Admission {
    #[must_use]
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted)
    }
}

/// Snapshot of both buckets, as served by the admin endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LimiterStats {
    pub ip: BucketStats,
    pub tenant: BucketStats,
}

/// Holds the per-IP and per-tenant buckets.
#[derive(Debug)]
pub struct AdmissionLimiter {
    ip: Bucket,
    tenant: Bucket,
    config: RateLimitConfig,
}

impl AdmissionLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            ip: Bucket::new(BucketKind::Ip, config.ip),
            tenant: Bucket::new(BucketKind::Tenant, config.tenant),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    #[must_use]
    pub fn bucket(&self, kind: BucketKind) -> &Bucket {
        match kind {
            BucketKind::Ip => &self.ip,
            BucketKind::Tenant => &self.tenant,
        }
    }

    /// Admits or denies one request.
    ///
    /// The IP bucket is consulted first; a request denied there is not
    /// counted against its tenant. Requests without a tenant only count
    /// against their IP.
    pub fn admit(&self, client_ip: &str, tenant: Option<&TenantId>) -> Admission {
        if let Decision::Denied { retry_after } = self.ip.check_and_record(client_ip) {
            return Admission::Denied {
                bucket: BucketKind::Ip,
                retry_after,
            };
        }

        if let Some(tenant) = tenant {
            if let Decision::Denied { retry_after } = self.tenant.check_and_record(tenant.as_str()) {
                return Admission::Denied {
                    bucket: BucketKind::Tenant,
                    retry_after,
                };
            }
        }

        Admission::Admitted
    }

    /// Reaps expired entries from both buckets. Returns the number removed.
    pub fn sweep(&self) -> usize {
        let reap = self.config.reap_expired_blocks;
        let removed = self.ip.sweep(reap) + self.tenant.sweep(reap);
        if removed > 0 {
            debug!(removed, "rate limit sweep");
        }
        removed
    }

    /// Removes `key` from the bucket of `kind`. Returns whether it was tracked.
    pub fn unblock(&self, kind: BucketKind, key: &str) -> bool {
        let removed = self.bucket(kind).unblock(key);
        if removed {
            info!(bucket = %kind, key, "rate limit entry cleared");
        }
        removed
    }

    #[must_use]
    pub fn stats(&self) -> LimiterStats {
        LimiterStats {
            ip: self.ip.stats(),
            tenant: self.tenant.stats(),
        }
    }

    /// Runs [`sweep`](Self::sweep) every `sweep_interval` until `shutdown`
    /// flips to `true` or its sender is dropped.
    #[must_use]
    pub fn spawn_sweeper(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        let period = self.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        limiter.sweep();
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("rate limit sweeper stopped");
        })
    }
}

impl Default for AdmissionLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::config::BucketConfig;

    fn limiter(ip_limit: u32, tenant_limit: u32) -> AdmissionLimiter {
        AdmissionLimiter::new(RateLimitConfig {
            ip: BucketConfig {
                limit: ip_limit,
                ..BucketConfig::per_ip()
            },
            tenant: BucketConfig {
                limit: tenant_limit,
                ..BucketConfig::per_tenant()
            },
            ..RateLimitConfig::default()
        })
    }

    #[test]
    fn ip_denial_does_not_count_against_tenant() {
        let limiter = limiter(2, 100);
        let tenant = TenantId::from("t-1");

        assert!(limiter.admit("1.1.1.1", Some(&tenant)).is_admitted());
        assert!(limiter.admit("1.1.1.1", Some(&tenant)).is_admitted());
        let denied = limiter.admit("1.1.1.1", Some(&tenant));

        assert!(matches!(denied, Admission::Denied { bucket: BucketKind::Ip, .. }));
        assert_eq!(limiter.bucket(BucketKind::Tenant).count("t-1"), Some(2));
    }

    #[test]
    fn one_ip_is_throttled_across_many_tenants() {
        let limiter = limiter(100, 1000);
        let tenants: Vec<TenantId> = (0..10).map(|i| TenantId::from(format!("t-{i}"))).collect();

        for i in 0..150 {
            let outcome = limiter.admit("9.9.9.9", Some(&tenants[i % tenants.len()]));
            if i < 100 {
                assert!(outcome.is_admitted(), "request {} should be admitted", i + 1);
            } else {
                assert!(
                    matches!(outcome, Admission::Denied { bucket: BucketKind::Ip, .. }),
                    "request {} should hit the IP bucket",
                    i + 1
                );
            }
        }

        let tenant_bucket = limiter.bucket(BucketKind::Tenant);
        let counted: u32 = tenants
            .iter()
            .map(|t| tenant_bucket.count(t.as_str()).unwrap_or(0))
            .sum();
        assert_eq!(counted, 100);
        assert!(limiter.bucket(BucketKind::Ip).is_blocked("9.9.9.9"));
    }

    #[test]
    fn tenant_limit_spans_client_ips() {
        let limiter = limiter(100, 3);
        let tenant = TenantId::from("t-1");

        for ip in ["1.1.1.1", "2.2.2.2", "3.3.3.3"] {
            assert!(limiter.admit(ip, Some(&tenant)).is_admitted());
        }
        let denied = limiter.admit("4.4.4.4", Some(&tenant));

        assert_eq!(
            denied,
            Admission::Denied {
                bucket: BucketKind::Tenant,
                retry_after: Duration::from_secs(300),
            }
        );
        assert!(limiter.admit("4.4.4.4", Some(&TenantId::from("t-2"))).is_admitted());
    }

    #[test]
    fn tenantless_requests_skip_tenant_bucket() {
        let limiter = limiter(100, 1);
        for _ in 0..5 {
            assert!(limiter.admit("1.1.1.1", None).is_admitted());
        }
        assert!(limiter.bucket(BucketKind::Tenant).is_empty());
    }

    #[test]
    fn unblock_clears_key_in_named_bucket() {
        let limiter = limiter(1, 100);
        limiter.admit("1.1.1.1", None);
        assert!(!limiter.admit("1.1.1.1", None).is_admitted());

        assert!(!limiter.unblock(BucketKind::Tenant, "1.1.1.1"));
        assert!(limiter.unblock(BucketKind::Ip, "1.1.1.1"));
        assert!(limiter.admit("1.1.1.1", None).is_admitted());
    }

    #[test]
    fn stats_report_both_buckets() {
        let limiter = limiter(1, 100);
        let tenant = TenantId::from("t-1");
        limiter.admit("1.1.1.1", Some(&tenant));
        limiter.admit("1.1.1.1", Some(&tenant));

        let stats = limiter.stats();
        assert_eq!(stats.ip.total, 1);
        assert_eq!(stats.ip.blocked, 1);
        assert_eq!(stats.ip.blocked_keys[0].key, "1.1.1.1");
        assert_eq!(stats.tenant.total, 1);
        assert_eq!(stats.tenant.blocked, 0);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["ip"]["blocked_keys"][0]["seconds_remaining"], 300);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_reaps_expired_counters() {
        let limiter = limiter(100, 100);
        limiter.admit("1.1.1.1", Some(&TenantId::from("t-1")));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(limiter.sweep(), 0);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(limiter.sweep(), 2);
        assert!(limiter.bucket(BucketKind::Ip).is_empty());
        assert!(limiter.bucket(BucketKind::Tenant).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn block_lapses_after_block_duration() {
        let limiter = limiter(1, 100);
        limiter.admit("1.1.1.1", None);
        assert!(!limiter.admit("1.1.1.1", None).is_admitted());

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(!limiter.admit("1.1.1.1", None).is_admitted());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.admit("1.1.1.1", None).is_admitted());
        assert_eq!(limiter.bucket(BucketKind::Ip).count("1.1.1.1"), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_runs_until_shutdown() {
        let limiter = Arc::new(limiter(100, 100));
        let (tx, rx) = watch::channel(false);
        let handle = limiter.spawn_sweeper(rx);

        limiter.admit("1.1.1.1", None);
        tokio::time::sleep(Duration::from_secs(121)).await;
        assert!(limiter.bucket(BucketKind::Ip).is_empty());

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
