use rand::Rng;
use serde::Serialize;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{error, info, warn};

use crate::config::DbConfig;
use crate::error::AppError;
use crate::TARGET_DB;

const QUERY_MAX_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF_BASE_MS: u64 = 1_000;
const RETRY_BACKOFF_CAP_MS: u64 = 5_000;
const SLOW_QUERY_THRESHOLD: Duration = Duration::from_secs(1);
const HEALTH_CHECK_DEADLINE: Duration = Duration::from_secs(5);
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);
const RECONNECT_MAX_ATTEMPTS: u32 = 5;

/// The storage gateway. Owns the connection pool; every other component
/// either borrows the pool for standalone queries or checks out a
/// transaction via `pool().begin()` and passes the handle down explicitly.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    state: Arc<GatewayState>,
}

struct GatewayState {
    connected: AtomicBool,
    reconnecting: AtomicBool,
    reconnect_attempts: AtomicU32,
    pool_max: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub size: u32,
    pub idle: usize,
    pub max: u32,
    pub reconnect_attempts: u32,
}

impl Database {
    /// Get access to the database pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn connect(config: &DbConfig) -> Result<Self, AppError> {
        info!(target: TARGET_DB, "Creating database pool for {}:{}/{}", config.host, config.port, config.name);

        let connect_options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.name)
            .username(&config.user)
            .password(&config.password);

        let pool = PgPoolOptions::new()
            .max_connections(config.pool_max)
            .min_connections(config.pool_min)
            .idle_timeout(Duration::from_millis(config.idle_timeout_ms))
            .acquire_timeout(Duration::from_millis(config.connect_timeout_ms))
            .connect_with(connect_options)
            .await
            .map_err(AppError::storage)?;

        info!(target: TARGET_DB, "Database pool created");

        let db = Database {
            pool,
            state: Arc::new(GatewayState {
                connected: AtomicBool::new(true),
                reconnecting: AtomicBool::new(false),
                reconnect_attempts: AtomicU32::new(0),
                pool_max: config.pool_max,
            }),
        };
        db.initialize_schema().await?;

        Ok(db)
    }

    /// Run a standalone query with the retry policy: up to three attempts
    /// with exponential backoff when the failure is a transient fault.
    /// Never use this for work inside a transaction; transactional failures
    /// abort the transaction and the caller decides.
    pub async fn with_retry<T, F, Fut>(&self, sql: &str, op: F) -> Result<T, AppError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        let mut attempt = 1;
        loop {
            let started = Instant::now();
            match op().await {
                Ok(value) => {
                    observe_slow(sql, started.elapsed());
                    return Ok(value);
                }
                Err(err) => {
                    observe_slow(sql, started.elapsed());
                    let app_err = AppError::storage(err);
                    if attempt >= QUERY_MAX_ATTEMPTS || !app_err.retryable() {
                        return Err(app_err);
                    }
                    let delay = retry_backoff(attempt);
                    warn!(
                        target: TARGET_DB,
                        "Transient query failure (attempt {}/{}), retrying in {:?}: {}",
                        attempt, QUERY_MAX_ATTEMPTS, delay, app_err
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Trivial read under a 5 second wall deadline. Success flips the
    /// connected flag; failure marks the gateway degraded and engages the
    /// background reconnect loop.
    pub async fn health_check(&self) -> bool {
        let probe = sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(&self.pool);
        match timeout(HEALTH_CHECK_DEADLINE, probe).await {
            Ok(Ok(_)) => {
                self.state.connected.store(true, Ordering::SeqCst);
                true
            }
            Ok(Err(err)) => {
                error!(target: TARGET_DB, "Health check failed: {}", err);
                self.mark_degraded();
                false
            }
            Err(_) => {
                error!(target: TARGET_DB, "Health check timed out after {:?}", HEALTH_CHECK_DEADLINE);
                self.mark_degraded();
                false
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    fn mark_degraded(&self) {
        self.state.connected.store(false, Ordering::SeqCst);
        self.spawn_reconnect_loop();
    }

    /// At most one reconnect loop runs at a time. Five attempts with
    /// exponential backoff; after exhaustion the gateway stays degraded
    /// until a later health probe succeeds.
    fn spawn_reconnect_loop(&self) {
        if self.state.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }
        let db = self.clone();
        tokio::spawn(async move {
            for attempt in 1..=RECONNECT_MAX_ATTEMPTS {
                db.state.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
                let delay = retry_backoff(attempt);
                info!(target: TARGET_DB, "Reconnect attempt {}/{} in {:?}", attempt, RECONNECT_MAX_ATTEMPTS, delay);
                sleep(delay).await;

                match sqlx::query_scalar::<_, i32>("SELECT 1")
                    .fetch_one(db.pool())
                    .await
                {
                    Ok(_) => {
                        info!(target: TARGET_DB, "Reconnected to database");
                        db.state.connected.store(true, Ordering::SeqCst);
                        db.state.reconnecting.store(false, Ordering::SeqCst);
                        return;
                    }
                    Err(err) => {
                        warn!(target: TARGET_DB, "Reconnect attempt {} failed: {}", attempt, err);
                    }
                }
            }
            error!(target: TARGET_DB, "Reconnect attempts exhausted; gateway degraded");
            db.state.reconnecting.store(false, Ordering::SeqCst);
        });
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.pool.size(),
            idle: self.pool.num_idle(),
            max: self.state.pool_max,
            reconnect_attempts: self.state.reconnect_attempts.load(Ordering::SeqCst),
        }
    }

    /// Close the pool with a 10 second ceiling. On timeout the pool
    /// reference is dropped regardless.
    pub async fn close(&self) {
        match timeout(SHUTDOWN_DEADLINE, self.pool.close()).await {
            Ok(()) => info!(target: TARGET_DB, "Database pool closed"),
            Err(_) => {
                warn!(target: TARGET_DB, "Pool close exceeded {:?}; dropping pool", SHUTDOWN_DEADLINE)
            }
        }
    }
}

/// Statements over the 1s threshold are logged with a truncated preview.
pub fn observe_slow(sql: &str, elapsed: Duration) {
    if elapsed > SLOW_QUERY_THRESHOLD {
        let preview: String = sql.chars().take(100).collect();
        warn!(target: TARGET_DB, "Slow query ({:?}): {}", elapsed, preview);
    }
}

/// Exponential backoff with a 5s cap and a little jitter to avoid lockstep
/// retries across workers.
fn retry_backoff(attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(16);
    let base = RETRY_BACKOFF_BASE_MS.saturating_mul(1 << shift);
    let capped = base.min(RETRY_BACKOFF_CAP_MS);
    let jitter = rand::rng().random_range(0..200);
    Duration::from_millis(capped + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps_at_five_seconds() {
        let first = retry_backoff(1).as_millis() as u64;
        let second = retry_backoff(2).as_millis() as u64;
        let tenth = retry_backoff(10).as_millis() as u64;

        assert!((1_000..1_200).contains(&first));
        assert!((2_000..2_200).contains(&second));
        assert!((5_000..5_200).contains(&tenth));
    }
}
