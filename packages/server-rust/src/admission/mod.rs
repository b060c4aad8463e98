//! Admission rate limiting: fixed-window counters per client IP and per
//! tenant, with a temporary block once a key exceeds its limit.

pub mod bucket;
pub mod config;
pub mod layer;
pub mod limiter;

pub use bucket::{BlockedKey, Bucket, BucketKind, BucketStats, Decision, UnknownBucketKind};
pub use config::{BucketConfig, InvalidRateLimit, RateLimitConfig};
pub use layer::{client_ip, too_many_requests, AdmissionLayer, AdmissionService};
pub use limiter::{Admission, AdmissionLimiter, LimiterStats};
