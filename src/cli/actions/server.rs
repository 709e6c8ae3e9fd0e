use crate::api::{
    self,
    state::{ApiConfig, ApiState},
};
use crate::cli::telemetry;
use crate::gateway::{
    Gateway,
    rate_limit::{LimiterConfig, RateLimiter, SWEEP_INTERVAL, TokenBucketLimiter, spawn_sweeper},
    store::{PermissionStore, TokenStore},
};
use crate::storage::{UserStore, memory::MemoryStore, postgres::PgStore};
use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<SecretString>,
    pub environment: String,
    pub limiter: LimiterConfig,
    pub trust_proxy_headers: bool,
    pub lookup_timeout: Duration,
    pub authentication_ttl: Duration,
    pub activation_ttl: Duration,
    pub password_reset_ttl: Duration,
    pub default_permission: String,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let limiter = Arc::new(TokenBucketLimiter::new(args.limiter));
    let sweeper = spawn_sweeper(Arc::clone(&limiter), SWEEP_INTERVAL);

    info!(
        env = %args.environment,
        rps = args.limiter.rps(),
        burst = args.limiter.burst(),
        enabled = args.limiter.enabled(),
        "rate limiter configured"
    );

    let result = serve(&args, limiter).await;

    sweeper.abort();
    telemetry::shutdown_tracer();

    result
}

async fn serve(args: &Args, limiter: Arc<TokenBucketLimiter>) -> Result<()> {
    match &args.dsn {
        Some(dsn) => {
            info!("Connecting to database: {}", redact_dsn(dsn.expose_secret()));

            let pool = PgPoolOptions::new()
                .min_connections(1)
                .max_connections(5)
                .acquire_timeout(args.lookup_timeout)
                .connect(dsn.expose_secret())
                .await
                .context("Failed to connect to database")?;

            let state = build_state(Arc::new(PgStore::new(pool)), limiter, args);
            api::serve(args.port, state).await
        }
        None => {
            warn!("No DSN configured, using the in-memory store; data is lost on restart");
            let state = build_state(Arc::new(MemoryStore::new()), limiter, args);
            api::serve(args.port, state).await
        }
    }
}

fn build_state<S>(store: Arc<S>, limiter: Arc<TokenBucketLimiter>, args: &Args) -> ApiState
where
    S: UserStore + TokenStore + PermissionStore + 'static,
{
    let limiter: Arc<dyn RateLimiter> = limiter;
    let tokens: Arc<dyn TokenStore> = store.clone();
    let permissions: Arc<dyn PermissionStore> = store.clone();
    let users: Arc<dyn UserStore> = store;

    let gateway = Gateway::new(limiter, tokens, permissions)
        .with_lookup_timeout(args.lookup_timeout)
        .with_trust_proxy_headers(args.trust_proxy_headers);

    let config = ApiConfig::new(args.environment.clone())
        .with_authentication_ttl(args.authentication_ttl)
        .with_activation_ttl(args.activation_ttl)
        .with_password_reset_ttl(args.password_reset_ttl)
        .with_default_permission(args.default_permission.clone());

    ApiState::new(Arc::new(gateway), users, config)
}

/// Render a DSN for logs with its password masked.
fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("****"));
            }
            url.to_string()
        }
        Err(_) => "<unparseable dsn>".to_string(),
    }
}
