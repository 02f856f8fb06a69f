/// Configuration management for the Branchline account service
use crate::error::{ServiceError, ServiceResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: HttpConfig,
    pub database: DatabaseConfig,
    pub password: PasswordPolicy,
    pub jwt: JwtConfig,
    pub email: Option<EmailConfig>,
    pub security: SecurityConfig,
    pub logging: LoggingConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub hostname: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Password policy enforced at the service boundary, before hashing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub max_length: usize,
    pub require_upper: bool,
    pub require_lower: bool,
    pub require_digit: bool,
    pub require_special: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            max_length: 128,
            require_upper: false,
            require_lower: false,
            require_digit: false,
            require_special: false,
        }
    }
}

/// Token signing configuration. TTLs are in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub signing_secret: String,
    pub issuer: String,
    pub access_ttl: i64,
    pub refresh_ttl: i64,
    pub reset_ttl: i64,
}

/// Outbound email configuration. Absent means sends are logged and skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_url: String,
    pub from_address: String,
    /// Verification token lifetime in seconds
    pub verification_ttl: i64,
    /// Base URL embedded in emailed links
    pub public_url: String,
}

/// Security switches. `max_login_attempts` is recognized but not enforced
/// by the core; it exists for deployments that gate upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub max_login_attempts: Option<u32>,
    pub require_email_verification_for_login: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

/// Roles an account may hold
pub const VALID_ROLES: &[&str] = &["admin", "manager", "user"];

/// Statuses an account may be in
pub const VALID_STATUSES: &[&str] = &["active", "inactive", "suspended", "pending"];

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> ServiceResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("BRANCHLINE_HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let port = env::var("BRANCHLINE_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| ServiceError::invalid_field("port", "invalid port number"))?;

        let db_path: PathBuf = env::var("BRANCHLINE_DB_PATH")
            .unwrap_or_else(|_| "./data/accounts.sqlite".to_string())
            .into();
        let max_connections = env::var("BRANCHLINE_DB_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);

        let password = PasswordPolicy {
            min_length: parse_env("BRANCHLINE_PASSWORD_MIN_LENGTH", 8),
            max_length: parse_env("BRANCHLINE_PASSWORD_MAX_LENGTH", 128),
            require_upper: parse_env("BRANCHLINE_PASSWORD_REQUIRE_UPPER", false),
            require_lower: parse_env("BRANCHLINE_PASSWORD_REQUIRE_LOWER", false),
            require_digit: parse_env("BRANCHLINE_PASSWORD_REQUIRE_DIGIT", false),
            require_special: parse_env("BRANCHLINE_PASSWORD_REQUIRE_SPECIAL", false),
        };

        let signing_secret = env::var("BRANCHLINE_JWT_SECRET")
            .map_err(|_| ServiceError::invalid_field("jwt_secret", "JWT secret required"))?;
        let jwt = JwtConfig {
            signing_secret,
            issuer: env::var("BRANCHLINE_JWT_ISSUER").unwrap_or_else(|_| "branchline".to_string()),
            access_ttl: parse_env("BRANCHLINE_JWT_ACCESS_TTL", 3600),
            refresh_ttl: parse_env("BRANCHLINE_JWT_REFRESH_TTL", 14 * 24 * 3600),
            reset_ttl: parse_env("BRANCHLINE_JWT_RESET_TTL", 3600),
        };

        let email = if let Ok(smtp_url) = env::var("BRANCHLINE_EMAIL_SMTP_URL") {
            Some(EmailConfig {
                smtp_url,
                from_address: env::var("BRANCHLINE_EMAIL_FROM_ADDRESS")
                    .unwrap_or_else(|_| format!("noreply@{}", hostname)),
                verification_ttl: parse_env("BRANCHLINE_EMAIL_VERIFICATION_TTL", 24 * 3600),
                public_url: env::var("BRANCHLINE_PUBLIC_URL")
                    .unwrap_or_else(|_| format!("http://{}:{}", hostname, port)),
            })
        } else {
            None
        };

        let security = SecurityConfig {
            max_login_attempts: env::var("BRANCHLINE_MAX_LOGIN_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok()),
            require_email_verification_for_login: parse_env(
                "BRANCHLINE_REQUIRE_EMAIL_VERIFICATION",
                false,
            ),
        };

        let level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Ok(AppConfig {
            server: HttpConfig { hostname, port },
            database: DatabaseConfig {
                path: db_path,
                max_connections,
            },
            password,
            jwt,
            email,
            security,
            logging: LoggingConfig { level },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> ServiceResult<()> {
        if self.server.hostname.is_empty() {
            return Err(ServiceError::invalid_field(
                "hostname",
                "hostname cannot be empty",
            ));
        }

        if self.jwt.signing_secret.len() < 32 {
            return Err(ServiceError::invalid_field(
                "jwt_secret",
                "JWT secret must be at least 32 characters",
            ));
        }

        if self.password.min_length < 8 || self.password.max_length > 1024 {
            return Err(ServiceError::invalid_field(
                "password",
                "password length bounds out of range",
            ));
        }

        Ok(())
    }

    /// Verification token lifetime in seconds, whether or not SMTP is configured
    pub fn verification_ttl(&self) -> i64 {
        self.email
            .as_ref()
            .map(|e| e.verification_ttl)
            .unwrap_or(24 * 3600)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
