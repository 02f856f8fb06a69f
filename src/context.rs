/// Application context
///
/// Shared state handed to every request handler. Construction wires the
/// pool, runs migrations, and assembles the account service with its
/// hasher, token minter and notification sink.
use crate::{
    account::AccountService,
    config::AppConfig,
    db::{self, AccountRepository, DatabaseOptions},
    error::ServiceResult,
    mailer::Mailer,
    password::Argon2Hasher,
    token::{JwtTokenMaker, TokenMinter},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub db: sqlx::SqlitePool,
    pub accounts: Arc<AccountService>,
    pub tokens: Arc<dyn TokenMinter>,
}

impl AppContext {
    pub async fn new(config: AppConfig) -> ServiceResult<Self> {
        let db = db::create_pool(
            &config.database.path,
            DatabaseOptions {
                max_connections: config.database.max_connections,
                ..Default::default()
            },
        )
        .await?;

        db::run_migrations(&db).await?;
        tracing::info!(path = %config.database.path.display(), "database ready");

        let tokens: Arc<dyn TokenMinter> = Arc::new(JwtTokenMaker::new(
            config.jwt.clone(),
            config.verification_ttl(),
        ));
        let mailer = Mailer::new(config.email.clone())?;
        if !mailer.is_configured() {
            tracing::warn!("email not configured, notifications will be logged and dropped");
        }

        let accounts = Arc::new(AccountService::new(
            Arc::new(AccountRepository::new(db.clone())),
            Arc::new(Argon2Hasher),
            Arc::clone(&tokens),
            Arc::new(mailer),
            &config,
        ));

        Ok(Self {
            config: Arc::new(config),
            db,
            accounts,
            tokens,
        })
    }
}
