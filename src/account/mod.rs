/// Account domain model and wire DTOs
///
/// The service operates on the internal `Account` record only; the request
/// and response types here are the two boundary mappings (wire-in, wire-out).

pub mod service;

pub use service::AccountService;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role held by an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Manager,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::User => "user",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "manager" => Ok(Role::Manager),
            "user" => Ok(Role::User),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of an account
///
/// `pending → active` via email verification or an admin; `active`,
/// `inactive` and `suspended` are admin transitions; deletion is a tombstone
/// and terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Inactive,
    Suspended,
    Pending,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Inactive => "inactive",
            AccountStatus::Suspended => "suspended",
            AccountStatus::Pending => "pending",
        }
    }
}

impl FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AccountStatus::Active),
            "inactive" => Ok(AccountStatus::Inactive),
            "suspended" => Ok(AccountStatus::Suspended),
            "pending" => Ok(AccountStatus::Pending),
            other => Err(format!("unknown status: {}", other)),
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Internal account record. Never serialized to the wire; `password_hash`
/// must not leave the service layer.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: i64,
    pub branch_id: i64,
    pub owner_id: i64,
    pub name: String,
    pub email: String,
    pub avatar: String,
    pub title: String,
    pub role: Role,
    pub status: AccountStatus,
    pub password_hash: String,
    pub email_verified: bool,
    /// Latest live refresh-token generation; see token module
    pub refresh_generation: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Sanitized account view returned over the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountView {
    pub id: i64,
    pub branch_id: i64,
    pub owner_id: i64,
    pub name: String,
    pub email: String,
    pub avatar: String,
    pub title: String,
    pub role: Role,
    pub status: AccountStatus,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Account> for AccountView {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            branch_id: account.branch_id,
            owner_id: account.owner_id,
            name: account.name.clone(),
            email: account.email.clone(),
            avatar: account.avatar.clone(),
            title: account.title.clone(),
            role: account.role,
            status: account.status,
            email_verified: account.email_verified,
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}

/// New-account fields handed to the credential store
#[derive(Debug, Clone)]
pub struct AccountDraft {
    pub branch_id: i64,
    pub owner_id: i64,
    pub name: String,
    pub email: String,
    pub avatar: String,
    pub title: String,
    pub role: Role,
    pub status: AccountStatus,
    pub password_hash: String,
}

/// Partial update; only populated fields overwrite
#[derive(Debug, Clone, Default)]
pub struct AccountPatch {
    pub id: i64,
    pub branch_id: Option<i64>,
    pub owner_id: Option<i64>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub avatar: Option<String>,
    pub title: Option<String>,
    pub role: Option<Role>,
}

// --- wire-in -------------------------------------------------------------

/// Self-service registration
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

/// Login with email + password
#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidateTokenRequest {
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyEmailRequest {
    pub verification_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResendVerificationRequest {
    pub email: String,
}

/// Administrative account creation
#[derive(Debug, Clone, Deserialize)]
pub struct CreateUserRequest {
    pub branch_id: i64,
    pub owner_id: i64,
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub title: String,
    pub role: String,
}

/// Partial account update; empty/absent fields are left untouched
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub branch_id: Option<i64>,
    pub owner_id: Option<i64>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub avatar: Option<String>,
    pub title: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// Search and list filters, straight off the query string
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    pub role: Option<String>,
    pub branch_id: Option<i64>,
    pub status: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

// --- wire-out ------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub status: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub user: AccountView,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPairResponse {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateTokenResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Body whose content is identical whether or not the referenced resource
/// exists; used on the forgot-password and resend-verification paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenericResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountListResponse {
    pub accounts: Vec<AccountView>,
    pub page: u32,
    pub page_size: u32,
}
