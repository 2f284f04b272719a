use diesel::r2d2::{ConnectionManager, Pool};
use diesel::PgConnection;
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::shared::errors::AppError;

pub type DbPool = Pool<ConnectionManager<PgConnection>>;

pub fn create_conn(cfg: &DatabaseConfig) -> Result<DbPool, diesel::r2d2::PoolError> {
    let manager = ConnectionManager::<PgConnection>::new(cfg.url());
    Pool::builder()
        .max_size(cfg.max_open_conns)
        .min_idle(Some(cfg.max_idle_conns))
        .max_lifetime(Some(Duration::from_secs(cfg.conn_max_lifetime_min * 60)))
        .build(manager)
}

/// Runs a diesel closure on the blocking pool with a pooled connection.
/// Every query in the codebase goes through here so no DB round-trip ever
/// blocks a tokio worker.
pub async fn blocking<F, T>(pool: &DbPool, f: F) -> Result<T, AppError>
where
    F: FnOnce(&mut PgConnection) -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| AppError::internal(anyhow::anyhow!("pool exhausted: {e}")))?;
        f(&mut conn)
    })
    .await
    .map_err(|e| AppError::internal(anyhow::anyhow!("blocking task failed: {e}")))?
}

/// Normalised page/per_page pair with sane bounds.
pub fn paginacion(page: Option<i64>, per_page: Option<i64>) -> (i64, i64) {
    let page = page.unwrap_or(1).max(1);
    let per_page = per_page.unwrap_or(20).clamp(1, 100);
    (page, per_page)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paginacion_acotada() {
        assert_eq!(paginacion(None, None), (1, 20));
        assert_eq!(paginacion(Some(0), Some(0)), (1, 1));
        assert_eq!(paginacion(Some(3), Some(500)), (3, 100));
        assert_eq!(paginacion(Some(-2), Some(50)), (1, 50));
    }
}
