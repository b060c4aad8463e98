//! `tenantgate-server`: HTTP front for the tenant binder and admission limiter.
//!
//! Every flag has a `TENANTGATE_*` environment fallback.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tenantgate_core::TenantVariable;
use tenantgate_server::admission::{AdmissionLimiter, BucketConfig, RateLimitConfig};
use tenantgate_server::network::{NetworkConfig, NetworkModule, TlsConfig, TokenDecoder};
use tenantgate_server::tenancy::{PoolConfig, SessionPool, TenantBindingFactory};
use tenantgate_server::traits::SessionFactory;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tenantgate-server", version, about = "Tenant isolation and admission rate limiting")]
struct Args {
    #[arg(long, env = "TENANTGATE_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "TENANTGATE_PORT", default_value_t = 3001)]
    port: u16,

    /// Allowed CORS origins, comma separated. `*` allows any.
    #[arg(long, env = "TENANTGATE_CORS_ORIGINS", value_delimiter = ',', default_value = "*")]
    cors_origins: Vec<String>,

    /// HS256 secret for bearer tokens. Without it every request is anonymous.
    #[arg(long, env = "TENANTGATE_JWT_SECRET", hide_env_values = true)]
    jwt_secret: Option<String>,

    #[arg(long, env = "TENANTGATE_IP_LIMIT", default_value_t = 100, value_parser = clap::value_parser!(u32).range(1..))]
    ip_limit: u32,

    #[arg(long, env = "TENANTGATE_TENANT_LIMIT", default_value_t = 1000, value_parser = clap::value_parser!(u32).range(1..))]
    tenant_limit: u32,

    /// Counting window for both buckets, in seconds.
    #[arg(long, env = "TENANTGATE_WINDOW_SECS", default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
    window_secs: u64,

    /// Block applied after a key exceeds its limit, in seconds.
    #[arg(long, env = "TENANTGATE_BLOCK_SECS", default_value_t = 300, value_parser = clap::value_parser!(u64).range(1..))]
    block_secs: u64,

    /// Let the sweep also remove blocked entries whose block has lapsed.
    #[arg(long, env = "TENANTGATE_REAP_EXPIRED_BLOCKS")]
    reap_expired_blocks: bool,

    /// Session variable carrying the tenant to row-scoping policies.
    #[arg(long, env = "TENANTGATE_SESSION_VARIABLE", default_value = TenantVariable::DEFAULT_KEY)]
    session_variable: String,

    /// `postgres://` URL. Enables the tenant-bound session pool.
    #[cfg(feature = "postgres")]
    #[arg(long, env = "TENANTGATE_DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    #[arg(
        long,
        env = "TENANTGATE_POOL_SIZE",
        default_value_t = 10,
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..)
    )]
    pool_size: usize,

    /// Address for the Prometheus scrape endpoint. Metrics are off without it.
    #[arg(long, env = "TENANTGATE_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,

    /// Emit logs as JSON lines.
    #[arg(long, env = "TENANTGATE_LOG_JSON")]
    log_json: bool,

    #[arg(long, env = "TENANTGATE_TLS_CERT", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    #[arg(long, env = "TENANTGATE_TLS_KEY", requires = "tls_cert")]
    tls_key: Option<PathBuf>,
}

impl Args {
    fn rate_limits(&self) -> RateLimitConfig {
        let window = Duration::from_secs(self.window_secs);
        let block_duration = Duration::from_secs(self.block_secs);
        RateLimitConfig {
            ip: BucketConfig {
                limit: self.ip_limit,
                window,
                block_duration,
            },
            tenant: BucketConfig {
                limit: self.tenant_limit,
                window,
                block_duration,
            },
            sweep_interval: window,
            reap_expired_blocks: self.reap_expired_blocks,
        }
    }

    fn network(&self) -> NetworkConfig {
        let tls = match (&self.tls_cert, &self.tls_key) {
            (Some(cert_path), Some(key_path)) => Some(TlsConfig {
                cert_path: cert_path.clone(),
                key_path: key_path.clone(),
            }),
            _ => None,
        };
        NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            tls,
            cors_origins: self.cors_origins.clone(),
            ..NetworkConfig::default()
        }
    }

    #[cfg(feature = "postgres")]
    fn session_factory(&self) -> anyhow::Result<Option<Arc<dyn SessionFactory>>> {
        let Some(url) = &self.database_url else {
            return Ok(None);
        };
        let factory = tenantgate_server::tenancy::PgSessionFactory::from_url(url)
            .context("invalid database URL")?;
        Ok(Some(Arc::new(factory)))
    }

    #[cfg(not(feature = "postgres"))]
    #[allow(clippy::unnecessary_wraps, clippy::unused_self)]
    fn session_factory(&self) -> anyhow::Result<Option<Arc<dyn SessionFactory>>> {
        Ok(None)
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    if let Some(addr) = args.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install Prometheus exporter")?;
        info!(%addr, "Prometheus exporter listening");
    }

    let variable = Arc::new(
        TenantVariable::new(args.session_variable.clone()).context("invalid session variable")?,
    );

    let rate_limits = args.rate_limits();
    rate_limits.validate()?;
    let limiter = Arc::new(AdmissionLimiter::new(rate_limits));
    let mut module = NetworkModule::new(args.network()).with_limiter(Arc::clone(&limiter));

    if let Some(factory) = args.session_factory()? {
        let pool = SessionPool::new(
            TenantBindingFactory::new(factory, Arc::clone(&variable)),
            PoolConfig {
                max_size: args.pool_size,
                ..PoolConfig::default()
            },
        );
        info!(variable = variable.key(), max_size = args.pool_size, "tenant-bound session pool ready");
        module = module.with_session_pool(pool);
    } else {
        info!("no database configured; /tenant reports the ambient tenant only");
    }

    match &args.jwt_secret {
        Some(secret) => module = module.with_token_decoder(TokenDecoder::hs256(secret.as_bytes())),
        None => warn!("no JWT secret configured; all requests are anonymous and limited per IP only"),
    }

    let shutdown = module.shutdown_controller();
    let sweeper = limiter.spawn_sweeper(shutdown.shutdown_receiver());

    let port = module.start().await?;
    info!(port, "tenantgate-server started");

    module
        .serve(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
        })
        .await?;

    sweeper.await.context("rate limit sweeper panicked")?;
    info!("tenantgate-server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::error::ErrorKind;

    use super::*;

    fn parse(extra: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("tenantgate-server").chain(extra.iter().copied()))
    }

    #[test]
    fn defaults_form_a_valid_config() {
        let args = parse(&[]).unwrap();
        assert_eq!(args.pool_size, 10);
        let limits = args.rate_limits();
        assert_eq!(limits.validate(), Ok(()));
        assert_eq!(limits.ip.limit, 100);
        assert_eq!(limits.tenant.block_duration, Duration::from_secs(300));
    }

    #[test]
    fn zero_window_is_rejected() {
        let err = parse(&["--window-secs", "0"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }

    #[test]
    fn zero_block_is_rejected() {
        let err = parse(&["--block-secs", "0"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }

    #[test]
    fn zero_pool_size_is_rejected() {
        let err = parse(&["--pool-size", "0"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }

    #[test]
    fn zero_limits_are_rejected() {
        for flag in ["--ip-limit", "--tenant-limit"] {
            let err = parse(&[flag, "0"]).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ValueValidation, "{flag}");
        }
    }

    #[test]
    fn positive_overrides_flow_into_rate_limits() {
        let args = parse(&["--window-secs", "1", "--block-secs", "2", "--pool-size", "1"]).unwrap();
        let limits = args.rate_limits();
        assert_eq!(limits.ip.window, Duration::from_secs(1));
        assert_eq!(limits.sweep_interval, Duration::from_secs(1));
        assert_eq!(limits.tenant.block_duration, Duration::from_secs(2));
        assert_eq!(args.pool_size, 1);
    }
}
