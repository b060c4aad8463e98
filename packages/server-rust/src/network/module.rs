//! Network module with deferred startup lifecycle.
//!
//! `new()` creates shared resources, `start()` binds the TCP listener, and
//! `serve()` accepts connections. The limiter, session pool, and token
//! decoder are attached between `new()` and `serve()`.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::routing::{delete, get};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::auth::{require_operator, TokenDecoder};
use super::config::{NetworkConfig, TlsConfig};
use super::handlers::{
    health_handler, liveness_handler, rate_limit_stats_handler, readiness_handler, tenant_handler,
    unblock_handler, AppState,
};
use super::middleware::{build_http_layers, build_tenancy_layers};
use super::shutdown::ShutdownController;
use crate::admission::AdmissionLimiter;
use crate::tenancy::SessionPool;

/// Manages the HTTP server lifecycle.
///
/// 1. `new()` -- allocates the shutdown controller and a default limiter
/// 2. `start()` -- binds TCP listener to the configured address
/// 3. `serve()` -- accepts connections until shutdown is signalled, then drains
pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    shutdown: Arc<ShutdownController>,
    limiter: Arc<AdmissionLimiter>,
    pool: Option<Arc<SessionPool>>,
    decoder: Option<Arc<TokenDecoder>>,
}

impl NetworkModule {
    #[must_use]
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            config,
            listener: None,
            shutdown: Arc::new(ShutdownController::new()),
            limiter: Arc::new(AdmissionLimiter::default()),
            pool: None,
            decoder: None,
        }
    }

    #[must_use]
    pub fn with_limiter(mut self, limiter: Arc<AdmissionLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    #[must_use]
    pub fn with_session_pool(mut self, pool: Arc<SessionPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Enables bearer token decoding. Without a decoder every request is anonymous.
    #[must_use]
    pub fn with_token_decoder(mut self, decoder: TokenDecoder) -> Self {
        self.decoder = Some(Arc::new(decoder));
        self
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    #[must_use]
    pub fn limiter(&self) -> Arc<AdmissionLimiter> {
        Arc::clone(&self.limiter)
    }

    /// Assembles the axum router with all routes and middleware.
    ///
    /// Routes:
    /// - `GET /health`, `/health/live`, `/health/ready`
    /// - `GET /tenant` -- ambient tenant and the database's view of it
    /// - `GET /admin/rate-limits` -- limiter stats (operator role)
    /// - `DELETE /admin/rate-limits/{kind}/{key}` -- clear one entry (operator role)
    pub fn build_router(&self) -> Router {
        let state = AppState {
            shutdown: Arc::clone(&self.shutdown),
            limiter: Arc::clone(&self.limiter),
            pool: self.pool.clone(),
            config: Arc::new(self.config.clone()),
            start_time: Instant::now(),
        };

        // Probes stay outside admission so orchestrators are never rate limited.
        let probes = Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler));

        let admin = Router::new()
            .route("/admin/rate-limits", get(rate_limit_stats_handler))
            .route("/admin/rate-limits/{kind}/{key}", delete(unblock_handler))
            .route_layer(axum::middleware::from_fn(require_operator));

        let api = Router::new()
            .route("/tenant", get(tenant_handler))
            .merge(admin)
            .layer(build_tenancy_layers(
                self.decoder.clone(),
                Arc::clone(&self.shutdown),
                Arc::clone(&self.limiter),
            ));

        probes
            .merge(api)
            .layer(build_http_layers(&self.config))
            .with_state(state)
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the actual bound port, which differs from the configured one
    /// when port 0 is used.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., port in use).
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!("TCP listener bound to {}:{}", self.config.host, port);

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves connections until `shutdown` resolves, then drains.
    ///
    /// After the shutdown signal the health state moves to Draining, new
    /// requests get 503, and in-flight requests get up to `drain_timeout`
    /// to finish. The session pool is closed last.
    ///
    /// # Errors
    ///
    /// Returns an error if the server encounters a fatal I/O error.
    ///
    /// # Panics
    ///
    /// Panics if `start()` was not called before `serve()`.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self
            .listener
            .take()
            .expect("start() must be called before serve()");
        let router = self.build_router();

        // Flip to Draining as soon as the signal fires so the drain gate
        // rejects new requests while axum finishes open connections.
        let ctrl = Arc::clone(&self.shutdown);
        let shutdown = async move {
            shutdown.await;
            ctrl.trigger_shutdown();
        };

        self.shutdown.set_ready();

        if let Some(tls_config) = &self.config.tls {
            serve_tls(listener, router, tls_config, shutdown).await?;
        } else {
            serve_plain(listener, router, shutdown).await?;
        }

        self.drain().await;
        Ok(())
    }

    async fn drain(&self) {
        self.shutdown.trigger_shutdown();

        let drained = self.shutdown.wait_for_drain(self.config.drain_timeout).await;
        if drained {
            info!("All in-flight requests drained");
        } else {
            warn!(
                in_flight = self.shutdown.in_flight_count(),
                "Drain timeout expired with in-flight requests remaining"
            );
        }

        if let Some(pool) = &self.pool {
            pool.close();
        }
    }
}

/// Serves plain HTTP connections using axum's built-in server.
async fn serve_plain(
    listener: TcpListener,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    info!("Serving plain HTTP connections");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    Ok(())
}

/// Serves TLS connections using `axum-server` with rustls.
///
/// Reuses the pre-bound TCP listener by converting it to a `std::net::TcpListener`.
async fn serve_tls(
    listener: TcpListener,
    router: Router,
    tls_config: &TlsConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    use axum_server::tls_rustls::RustlsConfig;

    let rustls_config = RustlsConfig::from_pem_file(&tls_config.cert_path, &tls_config.key_path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load TLS certificates: {e}"))?;

    let addr = listener.local_addr()?;
    let std_listener = listener.into_std()?;
    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();

    tokio::spawn(async move {
        shutdown.await;
        shutdown_handle.graceful_shutdown(None);
    });

    info!("Serving TLS connections on {}", addr);

    axum_server::from_tcp_rustls(std_listener, rustls_config)
        .handle(handle)
        .serve(router.into_make_service_with_connect_info::<SocketAddr>())
        .await?;
    Ok(())
}
