use std::sync::{Mutex, MutexGuard, OnceLock};

/// Serializes tests that mutate process environment variables. Poisoning is
/// tolerated: a panicking test must not wedge the rest of the suite.
pub(crate) fn env_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Migrated pool for tests that exercise real queries. `None` when no
/// database is reachable; callers skip in that case.
pub(crate) async fn test_pool() -> Option<sqlx::PgPool> {
    dotenvy::dotenv().ok();

    let url = match std::env::var("DATABASE_URL") {
        Ok(url) if !url.trim().is_empty() => url,
        _ => {
            let server = std::env::var("POSTGRES_SERVER").unwrap_or_else(|_| "localhost".into());
            let port = std::env::var("POSTGRES_PORT").unwrap_or_else(|_| "5432".into());
            let user = std::env::var("POSTGRES_USER").unwrap_or_else(|_| "pathway".into());
            let password = std::env::var("POSTGRES_PASSWORD").unwrap_or_default();
            let db = std::env::var("POSTGRES_DB").unwrap_or_else(|_| "pathway_db".into());
            format!("postgresql://{user}:{password}@{server}:{port}/{db}")
        }
    };

    let pool = match sqlx::postgres::PgPoolOptions::new().max_connections(2).connect(&url).await {
        Ok(pool) => pool,
        Err(err) => {
            eprintln!("skipping database test, no database: {err}");
            return None;
        }
    };

    if let Err(err) = crate::db::run_migrations(&pool).await {
        eprintln!("skipping database test, migrations failed: {err}");
        return None;
    }

    Some(pool)
}
