use std::sync::Arc;

use sqlx::PgPool;

use crate::utils::{config::Config, jwt::JwtService, mailer::Mailer};

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<Config>,
    pub jwt: Arc<JwtService>,
    pub mailer: Mailer,
}

impl AppState {
    pub fn new(db: PgPool, config: Config, mailer: Mailer) -> Self {
        let jwt = JwtService::new(&config.jwt);
        Self {
            db,
            config: Arc::new(config),
            jwt: Arc::new(jwt),
            mailer,
        }
    }
}
