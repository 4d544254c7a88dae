use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::info;

/// Connects the pool and brings the schema up to date.
pub async fn init_db(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database connected, migrations applied");

    Ok(pool)
}
