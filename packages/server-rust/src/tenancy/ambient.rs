//! Ambient tenant context carried by the request's task.
//!
//! Backed by a tokio task-local, so the value follows the request future
//! across every `.await` without being threaded through call signatures.
//! Work moved onto a new task with `tokio::spawn` does not inherit it; use
//! [`spawn_in_current_scope`] for request-scoped background work.

use std::future::Future;

use tenantgate_core::TenantId;
use tokio::task::futures::TaskLocalFuture;
use tokio::task::JoinHandle;

tokio::task_local! {
    static CURRENT_TENANT: Option<TenantId>;
}

/// Returns the tenant bound to the current task, or `None` when running
/// outside any scope or inside an unscoped one.
#[must_use]
pub fn current_tenant() -> Option<TenantId> {
    CURRENT_TENANT.try_with(Clone::clone).ok().flatten()
}

/// Runs `fut` with `tenant` as the ambient tenant.
pub fn scope<F: Future>(tenant: Option<TenantId>, fut: F) -> TaskLocalFuture<Option<TenantId>, F> {
    CURRENT_TENANT.scope(tenant, fut)
}

/// Runs the synchronous closure `f` with `tenant` as the ambient tenant.
pub fn sync_scope<R>(tenant: Option<TenantId>, f: impl FnOnce() -> R) -> R {
    CURRENT_TENANT.sync_scope(tenant, f)
}

/// Spawns `fut` on the runtime, carrying over the caller's ambient tenant.
pub fn spawn_in_current_scope<F>(fut: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(scope(current_tenant(), fut))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn none_outside_scope() {
        assert_eq!(current_tenant(), None);
    }

    #[tokio::test]
    async fn visible_across_awaits() {
        let seen = scope(Some(TenantId::from("a")), async {
            tokio::task::yield_now().await;
            tokio::time::sleep(Duration::from_millis(1)).await;
            current_tenant()
        })
        .await;
        assert_eq!(seen, Some(TenantId::from("a")));
        assert_eq!(current_tenant(), None);
    }

    #[tokio::test]
    async fn unscoped_scope_reads_none() {
        let seen = scope(None, async { current_tenant() }).await;
        assert_eq!(seen, None);
    }

    #[tokio::test]
    async fn interleaved_requests_stay_isolated() {
        let a = tokio::spawn(scope(Some(TenantId::from("a")), async {
            let mut seen = Vec::new();
            for _ in 0..20 {
                tokio::task::yield_now().await;
                seen.push(current_tenant());
            }
            seen
        }));
        let b = tokio::spawn(scope(Some(TenantId::from("b")), async {
            let mut seen = Vec::new();
            for _ in 0..20 {
                tokio::task::yield_now().await;
                seen.push(current_tenant());
            }
            seen
        }));

        let a = a.await.unwrap();
        let b = b.await.unwrap();
        assert!(a.iter().all(|t| t.as_ref().map(TenantId::as_str) == Some("a")));
        assert!(b.iter().all(|t| t.as_ref().map(TenantId::as_str) == Some("b")));
    }

    #[tokio::test]
    async fn spawn_in_current_scope_inherits_tenant() {
        let handle = scope(Some(TenantId::from("t-7")), async {
            spawn_in_current_scope(async { current_tenant() })
        })
        .await;
        assert_eq!(handle.await.unwrap(), Some(TenantId::from("t-7")));
    }

    #[tokio::test]
    async fn plain_spawn_does_not_inherit() {
        let handle = scope(Some(TenantId::from("t-7")), async {
            tokio::spawn(async { current_tenant() })
        })
        .await;
        assert_eq!(handle.await.unwrap(), None);
    }

    #[test]
    fn sync_scope_sets_value_for_closure() {
        let seen = sync_scope(Some(TenantId::from("s")), current_tenant);
        assert_eq!(seen, Some(TenantId::from("s")));
        assert_eq!(current_tenant(), None);
    }
}
