use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};

pub mod users;

pub type DbPool = Pool<Postgres>;

/// Create a database connection pool.
pub async fn create_pool(database_url: &str) -> anyhow::Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Run database migrations using SQLx's built-in migration tracking. Migrations are
/// tracked in the `_sqlx_migrations` table and only run once.
pub async fn run_migrations(pool: &DbPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
