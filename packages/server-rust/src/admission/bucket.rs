//! Fixed-window counters with a penalty box, keyed by caller identity.
//!
//! Per-key state machine:
//!
//! ```text
//! Fresh --first request--> Counting --count > limit--> Blocked
//!   ^                        ^   |                        |
//!   |                        |   +--window expired------->+ (next request restarts at 1)
//!   +------sweep-------------+                            |
//!                            +----block expired, next request
//! ```
//!
//! Each transition runs inside a single `DashMap` entry guard, so two
//! requests for the same key never interleave and other keys are untouched.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;
use tracing::warn;

use super::config::BucketConfig;

/// Which caller identity a bucket is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketKind {
    Ip,
    Tenant,
}

impl BucketKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ip => "ip",
            Self::Tenant => "tenant",
        }
    }
}

impl fmt::Display for BucketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown bucket kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown bucket kind {0:?}; expected \"ip\" or \"tenant\"")]
pub struct UnknownBucketKind(pub String);

impl FromStr for BucketKind {
    type Err = UnknownBucketKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ip" => Ok(Self::Ip),
            "tenant" => Ok(Self::Tenant),
            other => Err(UnknownBucketKind(other.to_string())),
        }
    }
}

/// Outcome of [`Bucket::check_and_record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { count: u32 },
    Denied { retry_after: Duration },
}

impl Decision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Per-key counter. `reset_at` is the window end while counting and the
/// block end while blocked.
#[derive(Debug, Clone, Copy)]
struct RateEntry {
    count: u32,
    reset_at: Instant,
    blocked: bool,
}

impl RateEntry {
    fn fresh(now: Instant, window: Duration) -> Self {
        Self {
            count: 1,
            reset_at: now + window,
            blocked: false,
        }
    }
}

/// A blocked key as reported by [`Bucket::stats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedKey {
    pub key: String,
    /// Whole seconds until the block lapses, rounded up. `0` means the block
    /// has lapsed and the entry awaits the key's next request.
    pub seconds_remaining: u64,
}

/// Read-only snapshot of one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketStats {
    pub total: usize,
    pub blocked: usize,
    pub blocked_keys: Vec<BlockedKey>,
}

/// One map of rate limit entries.
#[derive(Debug)]
pub struct Bucket {
    kind: BucketKind,
    config: BucketConfig,
    entries: DashMap<String, RateEntry>,
}

impl Bucket {
    #[must_use]
    pub fn new(kind: BucketKind, config: BucketConfig) -> Self {
        Self {
            kind,
            config,
            entries: DashMap::new(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> BucketKind {
        self.kind
    }

    #[must_use]
    pub fn config(&self) -> &BucketConfig {
        &self.config
    }

    /// Number of tracked keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current counter for `key`, if tracked.
    #[must_use]
    pub fn count(&self, key: &str) -> Option<u32> {
        self.entries.get(key).map(|e| e.count)
    }

    /// Whether `key` is in the blocked state (regardless of block expiry).
    #[must_use]
    pub fn is_blocked(&self, key: &str) -> bool {
        self.entries.get(key).is_some_and(|e| e.blocked)
    }

    /// Records one request for `key` and decides whether it may proceed.
    pub fn check_and_record(&self, key: &str) -> Decision {
        self.check_and_record_at(key, Instant::now())
    }

    fn check_and_record_at(&self, key: &str, now: Instant) -> Decision {
        let config = &self.config;
        match self.entries.entry(key.to_string()) {
            MapEntry::Vacant(vacant) => {
                vacant.insert(RateEntry::fresh(now, config.window));
                Decision::Allowed { count: 1 }
            }
            MapEntry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();

                if entry.blocked {
                    if now < entry.reset_at {
                        return Decision::Denied {
                            retry_after: entry.reset_at - now,
                        };
                    }
                    *entry = RateEntry::fresh(now, config.window);
                    return Decision::Allowed { count: 1 };
                }

                if now >= entry.reset_at {
                    *entry = RateEntry::fresh(now, config.window);
                    return Decision::Allowed { count: 1 };
                }

                entry.count = entry.count.saturating_add(1);
                if entry.count > config.limit {
                    entry.blocked = true;
                    entry.reset_at = now + config.block_duration;
                    warn!(
                        bucket = %self.kind,
                        key,
                        limit = config.limit,
                        block_secs = config.block_duration.as_secs(),
                        "rate limit exceeded; key blocked"
                    );
                    return Decision::Denied {
                        retry_after: config.block_duration,
                    };
                }

                if entry.count == config.warning_threshold() {
                    warn!(
                        bucket = %self.kind,
                        key,
                        count = entry.count,
                        limit = config.limit,
                        "approaching rate limit"
                    );
                }
                Decision::Allowed { count: entry.count }
            }
        }
    }

    /// Removes expired entries. Returns how many were removed.
    ///
    /// Blocked entries are kept unless `reap_expired_blocks` is set, in which
    /// case those whose block has lapsed are removed too.
    pub fn sweep(&self, reap_expired_blocks: bool) -> usize {
        self.sweep_at(Instant::now(), reap_expired_blocks)
    }

    fn sweep_at(&self, now: Instant, reap_expired_blocks: bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            let expired = now >= entry.reset_at;
            !expired || (entry.blocked && !reap_expired_blocks)
        });
        before.saturating_sub(self.entries.len())
    }

    /// Deletes `key` outright, whatever its state. Returns whether it existed.
    pub fn unblock(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    #[must_use]
    pub fn stats(&self) -> BucketStats {
        self.stats_at(Instant::now())
    }

    fn stats_at(&self, now: Instant) -> BucketStats {
        let mut blocked_keys: Vec<BlockedKey> = self
            .entries
            .iter()
            .filter(|e| e.blocked)
            .map(|e| BlockedKey {
                key: e.key().clone(),
                seconds_remaining: ceil_secs(e.reset_at.saturating_duration_since(now)),
            })
            .collect();
        blocked_keys.sort_by(|a, b| a.key.cmp(&b.key));

        BucketStats {
            total: self.entries.len(),
            blocked: blocked_keys.len(),
            blocked_keys,
        }
    }
}

pub(crate) fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}
