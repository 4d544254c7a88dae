mod db;
mod models;
mod route;
mod routemount;
mod state;
mod utils;

use anyhow::Context;
use tracing::info;

use db::init_db;

use crate::{
    routemount::route::create_router,
    state::AppState,
    utils::{config::Config, logger::init_logger, mailer::Mailer},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {

    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    init_logger(&config.log_level, config.log_json);

    //connect to db
    let db_pool = init_db(&config.database_url, config.max_connections)
        .await
        .context("database not connected")?;
    let mailer = Mailer::from_settings(&config.smtp).context("mailer setup failed")?;
    if !mailer.is_enabled() {
        info!("Email delivery disabled, messages will only be logged");
    }

    let server_address = config.server_address.clone();
    let app = create_router(AppState::new(db_pool, config, mailer));

    let listener = tokio::net::TcpListener::bind(&server_address)
        .await
        .with_context(|| format!("failed to bind {server_address}"))?;
    info!("Server running on {}", server_address);
    axum::serve(listener, app).await?;

    Ok(())
}
