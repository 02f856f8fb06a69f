//! End-to-end flows driven through the HTTP router with an in-memory
//! database. One-time tokens are read out-of-band from the token table,
//! standing in for the email a real deployment would send.

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use branchline::{
    account::{AccountDraft, AccountService, AccountStatus, Role},
    config::{
        AppConfig, DatabaseConfig, HttpConfig, JwtConfig, LoggingConfig, PasswordPolicy,
        SecurityConfig,
    },
    context::AppContext,
    db::{run_migrations, AccountRepository},
    mailer::Mailer,
    password::{Argon2Hasher, PasswordHasher},
    server::build_router,
    token::{JwtTokenMaker, TokenMinter},
};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceExt;

fn test_config() -> AppConfig {
    AppConfig {
        server: HttpConfig {
            hostname: "localhost".to_string(),
            port: 0,
        },
        database: DatabaseConfig {
            path: PathBuf::from(":memory:"),
            max_connections: 1,
        },
        password: PasswordPolicy::default(),
        jwt: JwtConfig {
            signing_secret: "integration-test-secret-0123456789abcdef".to_string(),
            issuer: "branchline".to_string(),
            access_ttl: 3600,
            refresh_ttl: 14 * 24 * 3600,
            reset_ttl: 3600,
        },
        email: None,
        security: SecurityConfig {
            max_login_attempts: None,
            require_email_verification_for_login: false,
        },
        logging: LoggingConfig {
            level: "warn".to_string(),
        },
    }
}

struct TestApp {
    router: Router,
    db: SqlitePool,
    tokens: Arc<dyn TokenMinter>,
    repo: AccountRepository,
}

async fn spawn_app() -> TestApp {
    let db = SqlitePool::connect(":memory:").await.unwrap();
    run_migrations(&db).await.unwrap();

    let config = test_config();
    let tokens: Arc<dyn TokenMinter> = Arc::new(JwtTokenMaker::new(
        config.jwt.clone(),
        config.verification_ttl(),
    ));
    let accounts = Arc::new(AccountService::new(
        Arc::new(AccountRepository::new(db.clone())),
        Arc::new(Argon2Hasher),
        Arc::clone(&tokens),
        Arc::new(Mailer::new(None).unwrap()),
        &config,
    ));

    let ctx = AppContext {
        config: Arc::new(config),
        db: db.clone(),
        accounts,
        tokens: Arc::clone(&tokens),
    };

    TestApp {
        router: build_router(ctx),
        repo: AccountRepository::new(db.clone()),
        db,
        tokens,
    }
}

impl TestApp {
    async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<Value>,
        bearer: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = bearer {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    /// Seed an admin directly in the store and mint it an access token
    async fn seed_admin(&self) -> String {
        let hash = Argon2Hasher.hash("Adm1n@pass").unwrap();
        let admin = self
            .repo
            .create_user(&AccountDraft {
                branch_id: 0,
                owner_id: 0,
                name: "Root Admin".to_string(),
                email: "admin@example.com".to_string(),
                avatar: String::new(),
                title: String::new(),
                role: Role::Admin,
                status: AccountStatus::Active,
                password_hash: hash,
            })
            .await
            .unwrap();
        self.tokens.mint_access(&admin).unwrap()
    }

    /// Latest unconsumed one-time token for a purpose, read out-of-band
    async fn stored_token(&self, purpose: &str) -> String {
        sqlx::query_scalar(
            "SELECT token FROM one_time_token WHERE purpose = ?1 AND consumed_at IS NULL \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(purpose)
        .fetch_one(&self.db)
        .await
        .unwrap()
    }

    async fn register_alice(&self) -> (StatusCode, Value) {
        self.request(
            "POST",
            "/accounts/register",
            Some(json!({
                "name": "Alice",
                "email": "alice@example.com",
                "password": "P@ssword1",
            })),
            None,
        )
        .await
    }

    async fn login(&self, email: &str, password: &str) -> (StatusCode, Value) {
        self.request(
            "POST",
            "/accounts/login",
            Some(json!({ "email": email, "password": password })),
            None,
        )
        .await
    }
}

#[tokio::test]
async fn registration_then_login() {
    let app = spawn_app().await;

    let (status, body) = app.register_alice().await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["id"], 1);
    assert_eq!(body["name"], "Alice");
    assert_eq!(body["email"], "alice@example.com");
    assert_eq!(body["status"], true);

    let (status, body) = app.login("alice@example.com", "P@ssword1").await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body["access_token"].as_str().unwrap().is_empty());
    assert!(!body["refresh_token"].as_str().unwrap().is_empty());
    assert_eq!(body["user"]["email"], "alice@example.com");
}

#[tokio::test]
async fn duplicate_registration_conflicts() {
    let app = spawn_app().await;
    app.register_alice().await;

    let (status, body) = app.register_alice().await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "email already registered");
}

#[tokio::test]
async fn login_failure_bodies_are_byte_identical() {
    let app = spawn_app().await;
    app.register_alice().await;

    let (wrong_status, wrong_body) = app.login("alice@example.com", "wrong").await;
    let (ghost_status, ghost_body) = app.login("ghost@example.com", "whatever").await;

    assert_eq!(wrong_status, StatusCode::UNAUTHORIZED);
    assert_eq!(ghost_status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong_body, json!({ "error": "invalid credentials" }));
    assert_eq!(wrong_body, ghost_body);
}

#[tokio::test]
async fn refresh_token_rotation() {
    let app = spawn_app().await;
    app.register_alice().await;
    let (_, login) = app.login("alice@example.com", "P@ssword1").await;
    let refresh = login["refresh_token"].as_str().unwrap().to_string();

    let (status, rotated) = app
        .request(
            "POST",
            "/accounts/refresh-token",
            Some(json!({ "refresh_token": refresh })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let new_refresh = rotated["refresh_token"].as_str().unwrap();
    assert!(!rotated["access_token"].as_str().unwrap().is_empty());
    assert_ne!(new_refresh, refresh);

    // The presented token is dead after rotation
    let (status, _) = app
        .request(
            "POST",
            "/accounts/refresh-token",
            Some(json!({ "refresh_token": refresh })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // The rotated token still works
    let (status, _) = app
        .request(
            "POST",
            "/accounts/refresh-token",
            Some(json!({ "refresh_token": new_refresh })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn forgot_and_reset_password_flow() {
    let app = spawn_app().await;
    app.register_alice().await;

    let (status, known) = app
        .request(
            "POST",
            "/accounts/forgot-password",
            Some(json!({ "email": "alice@example.com" })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    // Unknown email gets the exact same response
    let (status, unknown) = app
        .request(
            "POST",
            "/accounts/forgot-password",
            Some(json!({ "email": "ghost@example.com" })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(known, unknown);

    let token = app.stored_token("reset").await;
    let (status, _) = app
        .request(
            "POST",
            "/accounts/reset-password",
            Some(json!({ "token": token.clone(), "new_password": "N3w@ssword" })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.login("alice@example.com", "P@ssword1").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app.login("alice@example.com", "N3w@ssword").await;
    assert_eq!(status, StatusCode::OK);

    // The reset token is single use
    let (status, _) = app
        .request(
            "POST",
            "/accounts/reset-password",
            Some(json!({ "token": token, "new_password": "An0ther@pw" })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn email_verification_flow() {
    let app = spawn_app().await;
    app.register_alice().await;
    let admin_token = app.seed_admin().await;

    let token = app.stored_token("verify").await;
    let (status, _) = app
        .request(
            "POST",
            "/accounts/verify-email",
            Some(json!({ "verification_token": token })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .request("GET", "/accounts/1", None, Some(&admin_token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email_verified"], true);
    assert_eq!(body["status"], "active");

    // Replay fails
    let (status, _) = app
        .request(
            "POST",
            "/accounts/verify-email",
            Some(json!({ "verification_token": token })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn validate_token_endpoint() {
    let app = spawn_app().await;
    app.register_alice().await;
    let (_, login) = app.login("alice@example.com", "P@ssword1").await;
    let access = login["access_token"].as_str().unwrap();

    let (status, body) = app
        .request(
            "POST",
            "/accounts/validate-token",
            Some(json!({ "token": access })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
    assert_eq!(body["user_id"], 1);
    assert!(body["expires_at"].is_string());

    let (status, body) = app
        .request(
            "POST",
            "/accounts/validate-token",
            Some(json!({ "token": "not.a.token" })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], false);
    assert!(body.get("user_id").is_none());
}

#[tokio::test]
async fn admin_surface_requires_admin_role() {
    let app = spawn_app().await;
    app.register_alice().await;
    let (_, login) = app.login("alice@example.com", "P@ssword1").await;
    let user_token = login["access_token"].as_str().unwrap().to_string();
    let admin_token = app.seed_admin().await;

    // Regular users cannot list accounts
    let (status, _) = app.request("GET", "/accounts", None, Some(&user_token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app.request("GET", "/accounts", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Admin creates an active manager account
    let (status, body) = app
        .request(
            "POST",
            "/accounts",
            Some(json!({
                "branch_id": 3,
                "owner_id": 1,
                "name": "Bob",
                "email": "bob@example.com",
                "password": "P@ssword1",
                "title": "Branch manager",
                "role": "manager",
            })),
            Some(&admin_token),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "active");
    assert_eq!(body["role"], "manager");

    let (status, body) = app
        .request("GET", "/accounts?page=1&page_size=10", None, Some(&admin_token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accounts"].as_array().unwrap().len(), 3);

    let (status, body) = app
        .request("GET", "/accounts/role/manager", None, Some(&admin_token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["email"], "bob@example.com");

    let (status, body) = app
        .request(
            "GET",
            "/accounts/search?q=bob&status=active",
            None,
            Some(&admin_token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn suspension_blocks_login_and_refresh() {
    let app = spawn_app().await;
    app.register_alice().await;
    let admin_token = app.seed_admin().await;
    let (_, login) = app.login("alice@example.com", "P@ssword1").await;
    let refresh = login["refresh_token"].as_str().unwrap().to_string();

    let (status, body) = app
        .request(
            "PUT",
            "/accounts/1/status",
            Some(json!({ "status": "suspended" })),
            Some(&admin_token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "suspended");

    let (status, _) = app.login("alice@example.com", "P@ssword1").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .request(
            "POST",
            "/accounts/refresh-token",
            Some(json!({ "refresh_token": refresh })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn delete_frees_email_for_reregistration() {
    let app = spawn_app().await;
    app.register_alice().await;
    let admin_token = app.seed_admin().await;

    let (status, _) = app
        .request("DELETE", "/accounts/1", None, Some(&admin_token))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .request("GET", "/accounts/1", None, Some(&admin_token))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.register_alice().await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn change_password_is_self_or_admin() {
    let app = spawn_app().await;
    app.register_alice().await;
    let (_, login) = app.login("alice@example.com", "P@ssword1").await;
    let user_token = login["access_token"].as_str().unwrap().to_string();

    // Another account's password is off limits for a regular user
    let (status, _) = app
        .request(
            "PUT",
            "/accounts/2/password",
            Some(json!({ "current_password": "x", "new_password": "N3w@ssword" })),
            Some(&user_token),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .request(
            "PUT",
            "/accounts/1/password",
            Some(json!({ "current_password": "P@ssword1", "new_password": "N3w@ssword" })),
            Some(&user_token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.login("alice@example.com", "N3w@ssword").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn hashes_never_leave_the_service() {
    let app = spawn_app().await;
    let (_, register) = app.register_alice().await;
    let admin_token = app.seed_admin().await;
    let (_, login) = app.login("alice@example.com", "P@ssword1").await;
    let (_, fetched) = app
        .request("GET", "/accounts/1", None, Some(&admin_token))
        .await;

    for body in [register, login, fetched] {
        let text = body.to_string();
        assert!(!text.contains("password_hash"));
        assert!(!text.contains("$argon2"));
    }
}

#[tokio::test]
async fn validation_errors_name_fields() {
    let app = spawn_app().await;

    let (status, body) = app
        .request(
            "POST",
            "/accounts/register",
            Some(json!({ "name": "", "email": "nope", "password": "short" })),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let fields: Vec<&str> = body["fields"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["field"].as_str().unwrap())
        .collect();
    assert!(fields.contains(&"name"));
    assert!(fields.contains(&"email"));
    assert!(fields.contains(&"password"));
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let app = spawn_app().await;
    let (status, body) = app.request("GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}
