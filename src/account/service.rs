/// Account service
///
/// Orchestrates the password hasher, token minter, credential store and
/// notification sink. Every operation follows the same ordering: validation
/// first, then hashing, then persistence, then token issuance, and finally
/// notification dispatch on a detached task. Notification failures never
/// propagate back to the caller and never roll back persisted state.
use crate::{
    account::{
        Account, AccountDraft, AccountListResponse, AccountPatch, AccountStatus,
        AccountView, ChangePasswordRequest, CreateUserRequest, ForgotPasswordRequest,
        GenericResponse, LoginRequest, LoginResponse, RefreshTokenRequest, RegisterRequest,
        RegisterResponse, ResendVerificationRequest, ResetPasswordRequest, Role, SearchParams,
        TokenPairResponse, UpdateStatusRequest, UpdateUserRequest, ValidateTokenRequest,
        ValidateTokenResponse, VerifyEmailRequest,
    },
    config::AppConfig,
    db::AccountRepository,
    error::{ServiceError, ServiceResult},
    mailer::NotificationSink,
    password::PasswordHasher,
    token::TokenMinter,
    validation::{normalize_email, RequestValidator},
};
use chrono::{DateTime, Duration, Utc};
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

/// Body returned by ForgotPassword whether or not the email exists
const FORGOT_PASSWORD_MESSAGE: &str = "If the email exists, a password reset link has been sent";

/// Body returned by ResendVerification whether or not the email exists
const RESEND_VERIFICATION_MESSAGE: &str =
    "If the email exists and is unverified, a verification email has been sent";

/// The account and credential-lifecycle engine
pub struct AccountService {
    repo: Arc<AccountRepository>,
    hasher: Arc<dyn PasswordHasher>,
    tokens: Arc<dyn TokenMinter>,
    notifier: Arc<dyn NotificationSink>,
    validator: RequestValidator,
    require_verified_login: bool,
    reset_ttl: i64,
    verification_ttl: i64,
}

impl AccountService {
    pub fn new(
        repo: Arc<AccountRepository>,
        hasher: Arc<dyn PasswordHasher>,
        tokens: Arc<dyn TokenMinter>,
        notifier: Arc<dyn NotificationSink>,
        config: &AppConfig,
    ) -> Self {
        Self {
            repo,
            hasher,
            tokens,
            notifier,
            validator: RequestValidator::new(&config.password),
            require_verified_login: config.security.require_email_verification_for_login,
            reset_ttl: config.jwt.reset_ttl,
            verification_ttl: config.verification_ttl(),
        }
    }

    // --- registration & authentication -----------------------------------

    /// Self-service registration. New accounts start pending and unverified;
    /// a verification email goes out on a detached task.
    pub async fn register(&self, req: RegisterRequest) -> ServiceResult<RegisterResponse> {
        self.validator.check(&[
            ("name", &req.name),
            ("email", &req.email),
            ("password", &req.password),
        ])?;

        let email = normalize_email(&req.email);
        if self.repo.exists_by_email(&email).await? {
            return Err(ServiceError::DuplicateEmail);
        }

        let password_hash = self.hasher.hash(&req.password)?;
        let account = self
            .repo
            .register(&AccountDraft {
                branch_id: 0,
                owner_id: 0,
                name: req.name.trim().to_string(),
                email,
                avatar: String::new(),
                title: String::new(),
                role: Role::User,
                status: AccountStatus::Pending,
                password_hash,
            })
            .await?;

        // The account exists either way; a failed token issue is recoverable
        // through resend-verification, so it only gets logged here.
        if let Err(e) = self.issue_verification(&account.email).await {
            tracing::warn!(account_id = account.id, error = %e, "verification token issue failed");
        }

        tracing::info!(account_id = account.id, "account registered");

        Ok(RegisterResponse {
            id: account.id,
            name: account.name,
            email: account.email,
            status: true,
        })
    }

    /// Administrative account creation with caller-chosen role. Accounts
    /// created this way start active; a welcome email goes out detached.
    pub async fn create_user(&self, req: CreateUserRequest) -> ServiceResult<AccountView> {
        self.validator.check(&[
            ("name", &req.name),
            ("email", &req.email),
            ("password", &req.password),
            ("title", &req.title),
            ("role", &req.role),
        ])?;
        let role = Role::from_str(&req.role)
            .map_err(|e| ServiceError::invalid_field("role", e))?;

        let email = normalize_email(&req.email);
        if self.repo.exists_by_email(&email).await? {
            return Err(ServiceError::DuplicateEmail);
        }

        let password_hash = self.hasher.hash(&req.password)?;
        let account = self
            .repo
            .create_user(&AccountDraft {
                branch_id: req.branch_id,
                owner_id: req.owner_id,
                name: req.name.trim().to_string(),
                email,
                avatar: req.avatar,
                title: req.title,
                role,
                status: AccountStatus::Active,
                password_hash,
            })
            .await?;

        let notifier = Arc::clone(&self.notifier);
        let (to, name) = (account.email.clone(), account.name.clone());
        dispatch("welcome", async move { notifier.send_welcome(&to, &name).await });

        tracing::info!(account_id = account.id, role = %account.role, "account created");

        Ok(AccountView::from(&account))
    }

    /// Authenticate and mint an access/refresh pair.
    ///
    /// Unknown email and wrong password are indistinguishable to the
    /// caller, and neither suspended nor deactivated accounts receive
    /// tokens.
    pub async fn login(&self, req: LoginRequest) -> ServiceResult<LoginResponse> {
        let email = normalize_email(&req.email);
        let account = match self.repo.find_by_email(&email).await {
            Ok(account) => account,
            Err(ServiceError::NotFound(_)) => return Err(ServiceError::InvalidCredentials),
            Err(e) => return Err(e),
        };

        if !self.hasher.verify(&account.password_hash, &req.password) {
            return Err(ServiceError::InvalidCredentials);
        }

        self.check_may_hold_tokens(&account)
            .map_err(|_| ServiceError::InvalidCredentials)?;

        let (access_token, refresh_token) = self.mint_pair(&account).await?;

        tracing::info!(account_id = account.id, "login");

        Ok(LoginResponse {
            access_token,
            refresh_token,
            user: AccountView::from(&account),
        })
    }

    /// Logout performs no server-side state change: access tokens are
    /// short-lived and there is no revocation list.
    pub async fn logout(&self) -> ServiceResult<GenericResponse> {
        tracing::info!("logout");
        Ok(GenericResponse {
            success: true,
            message: "Successfully logged out".to_string(),
        })
    }

    /// Rotate a refresh token: the returned pair is fresh and the presented
    /// token is dead afterwards, whether or not this call also advanced
    /// other sessions.
    pub async fn refresh_token(&self, req: RefreshTokenRequest) -> ServiceResult<TokenPairResponse> {
        let claims = self.tokens.verify_refresh(&req.refresh_token)?;

        let account = match self.repo.find_by_id(claims.sub).await {
            Ok(account) => account,
            Err(ServiceError::NotFound(_)) => return Err(ServiceError::InvalidToken),
            Err(e) => return Err(e),
        };

        // Only the latest generation is live
        if claims.gen != account.refresh_generation {
            return Err(ServiceError::InvalidToken);
        }

        self.check_may_hold_tokens(&account)?;

        let (access_token, refresh_token) = self.mint_pair(&account).await?;

        Ok(TokenPairResponse {
            access_token,
            refresh_token,
        })
    }

    /// Report whether an access token is valid. Failures carry no detail
    /// beyond the validity flag.
    pub async fn validate_token(&self, req: ValidateTokenRequest) -> ServiceResult<ValidateTokenResponse> {
        match self.tokens.verify_access(&req.token) {
            Ok(claims) => Ok(ValidateTokenResponse {
                valid: true,
                user_id: Some(claims.sub),
                expires_at: DateTime::from_timestamp(claims.exp, 0),
            }),
            Err(_) => Ok(ValidateTokenResponse {
                valid: false,
                user_id: None,
                expires_at: None,
            }),
        }
    }

    // --- password lifecycle ----------------------------------------------

    /// Change a password given the current one. Outstanding refresh tokens
    /// are retired.
    pub async fn change_password(&self, id: i64, req: ChangePasswordRequest) -> ServiceResult<GenericResponse> {
        self.validator.check_field("password", &req.new_password)?;

        let account = self.repo.find_by_id(id).await?;

        if !self.hasher.verify(&account.password_hash, &req.current_password) {
            return Err(ServiceError::InvalidCredentials);
        }

        let new_hash = self.hasher.hash(&req.new_password)?;
        self.repo.update_password(id, &new_hash).await?;
        self.repo.advance_refresh_generation(id).await?;

        let notifier = Arc::clone(&self.notifier);
        let (to, name) = (account.email.clone(), account.name.clone());
        dispatch("password-changed", async move {
            notifier.send_password_changed(&to, &name).await
        });

        tracing::info!(account_id = id, "password changed");

        Ok(GenericResponse {
            success: true,
            message: "Password changed successfully".to_string(),
        })
    }

    /// Begin the reset flow. The response body is identical whether or not
    /// the email exists, to defeat enumeration.
    pub async fn forgot_password(&self, req: ForgotPasswordRequest) -> ServiceResult<GenericResponse> {
        let email = normalize_email(&req.email);

        let account = match self.repo.find_by_email(&email).await {
            Ok(account) => account,
            Err(ServiceError::NotFound(_)) => return Ok(Self::forgot_password_response()),
            Err(e) => return Err(e),
        };

        let token = self.tokens.mint_reset(&account.email)?;
        let expires_at = Utc::now() + Duration::seconds(self.reset_ttl);
        self.repo
            .store_reset_token(&account.email, &token, expires_at)
            .await?;

        let notifier = Arc::clone(&self.notifier);
        let to = account.email.clone();
        dispatch("password-reset", async move {
            notifier.send_password_reset(&to, &token).await
        });

        Ok(Self::forgot_password_response())
    }

    fn forgot_password_response() -> GenericResponse {
        GenericResponse {
            success: true,
            message: FORGOT_PASSWORD_MESSAGE.to_string(),
        }
    }

    /// Complete the reset flow. The token is consumed atomically before the
    /// password changes; a second presentation fails.
    pub async fn reset_password(&self, req: ResetPasswordRequest) -> ServiceResult<GenericResponse> {
        // Signature and expiry gate first, then the single-use record
        self.tokens.verify_reset(&req.token)?;
        self.validator.check_field("password", &req.new_password)?;

        let email = self.repo.validate_reset_token(&req.token).await?;

        let account = match self.repo.find_by_email(&email).await {
            Ok(account) => account,
            // Account vanished since the token was issued
            Err(ServiceError::NotFound(_)) => return Err(ServiceError::InvalidToken),
            Err(e) => return Err(e),
        };

        let new_hash = self.hasher.hash(&req.new_password)?;
        self.repo.update_password(account.id, &new_hash).await?;
        self.repo.advance_refresh_generation(account.id).await?;

        tracing::info!(account_id = account.id, "password reset");

        Ok(GenericResponse {
            success: true,
            message: "Password has been reset successfully".to_string(),
        })
    }

    // --- email verification ----------------------------------------------

    /// Verify an email address; a pending account becomes active.
    pub async fn verify_email(&self, req: VerifyEmailRequest) -> ServiceResult<GenericResponse> {
        self.tokens.verify_verify(&req.verification_token)?;

        let email = self
            .repo
            .validate_verification_token(&req.verification_token)
            .await?;
        match self.repo.mark_verified(&email).await {
            Ok(()) => {}
            // Account vanished since the token was issued
            Err(ServiceError::NotFound(_)) => return Err(ServiceError::InvalidToken),
            Err(e) => return Err(e),
        }

        tracing::info!(email, "email verified");

        Ok(GenericResponse {
            success: true,
            message: "Email verified successfully".to_string(),
        })
    }

    /// Re-issue a verification token, retiring any outstanding one. The
    /// response body never reveals whether the email exists.
    pub async fn resend_verification(&self, req: ResendVerificationRequest) -> ServiceResult<GenericResponse> {
        let email = normalize_email(&req.email);

        match self.repo.find_by_email(&email).await {
            Ok(account) if !account.email_verified => {
                self.issue_verification(&account.email).await?;
            }
            Ok(_) | Err(ServiceError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        Ok(GenericResponse {
            success: true,
            message: RESEND_VERIFICATION_MESSAGE.to_string(),
        })
    }

    /// Mint and store a verification token, then dispatch the email.
    /// Storing invalidates any prior unconsumed token for the address.
    async fn issue_verification(&self, email: &str) -> ServiceResult<()> {
        let token = self.tokens.mint_verify(email)?;
        let expires_at = Utc::now() + Duration::seconds(self.verification_ttl);
        self.repo
            .store_verification_token(email, &token, expires_at)
            .await?;

        let notifier = Arc::clone(&self.notifier);
        let to = email.to_string();
        dispatch("verification", async move {
            notifier.send_verification(&to, &token).await
        });

        Ok(())
    }

    // --- account management ----------------------------------------------

    pub async fn find_by_id(&self, id: i64) -> ServiceResult<AccountView> {
        let account = self.repo.find_by_id(id).await?;
        Ok(AccountView::from(&account))
    }

    pub async fn find_by_email(&self, email: &str) -> ServiceResult<AccountView> {
        let account = self.repo.find_by_email(&normalize_email(email)).await?;
        Ok(AccountView::from(&account))
    }

    /// Partial update; empty or absent fields are left untouched.
    pub async fn update_user(&self, id: i64, req: UpdateUserRequest) -> ServiceResult<AccountView> {
        let mut patch = AccountPatch {
            id,
            branch_id: req.branch_id,
            owner_id: req.owner_id,
            name: req.name.filter(|s| !s.is_empty()),
            email: None,
            avatar: req.avatar.filter(|s| !s.is_empty()),
            title: req.title.filter(|s| !s.is_empty()),
            role: None,
        };

        if let Some(name) = &patch.name {
            self.validator.check_field("name", name)?;
        }
        if let Some(email) = req.email.filter(|s| !s.is_empty()) {
            self.validator.check_field("email", &email)?;
            patch.email = Some(normalize_email(&email));
        }
        if let Some(role) = req.role.filter(|s| !s.is_empty()) {
            self.validator.check_field("role", &role)?;
            patch.role = Some(Role::from_str(&role).map_err(|e| ServiceError::invalid_field("role", e))?);
        }

        let account = self.repo.update_user(&patch).await?;
        Ok(AccountView::from(&account))
    }

    /// Tombstone an account and dispatch the deactivation notice.
    pub async fn delete_user(&self, id: i64) -> ServiceResult<()> {
        let account = self.repo.find_by_id(id).await?;
        self.repo.delete_user(id).await?;

        let notifier = Arc::clone(&self.notifier);
        let (to, name) = (account.email.clone(), account.name.clone());
        dispatch("deactivation", async move {
            notifier.send_deactivation(&to, &name).await
        });

        tracing::info!(account_id = id, "account deleted");
        Ok(())
    }

    pub async fn update_status(&self, id: i64, req: UpdateStatusRequest) -> ServiceResult<AccountView> {
        self.validator.check_field("status", &req.status)?;
        let status = AccountStatus::from_str(&req.status)
            .map_err(|e| ServiceError::invalid_field("status", e))?;

        self.repo.update_status(id, status).await?;
        self.find_by_id(id).await
    }

    // --- list / search (repository pass-throughs) ------------------------

    pub async fn list(&self, page: u32, page_size: u32) -> ServiceResult<AccountListResponse> {
        let accounts = self.repo.find_all(page, page_size).await?;
        Ok(AccountListResponse {
            accounts: accounts.iter().map(AccountView::from).collect(),
            page: page.max(1),
            page_size,
        })
    }

    pub async fn find_by_branch(&self, branch_id: i64) -> ServiceResult<Vec<AccountView>> {
        let accounts = self.repo.find_by_branch(branch_id).await?;
        Ok(accounts.iter().map(AccountView::from).collect())
    }

    pub async fn find_by_role(&self, role: &str) -> ServiceResult<Vec<AccountView>> {
        self.validator.check_field("role", role)?;
        let accounts = self.repo.find_by_role(role).await?;
        Ok(accounts.iter().map(AccountView::from).collect())
    }

    pub async fn search(&self, params: SearchParams) -> ServiceResult<Vec<AccountView>> {
        if let Some(role) = params.role.as_deref().filter(|r| !r.is_empty()) {
            self.validator.check_field("role", role)?;
        }
        if let Some(status) = params.status.as_deref().filter(|s| !s.is_empty()) {
            self.validator.check_field("status", status)?;
        }
        let accounts = self.repo.search(&params).await?;
        Ok(accounts.iter().map(AccountView::from).collect())
    }

    // --- helpers ---------------------------------------------------------

    /// Mint a fresh access/refresh pair, advancing the refresh generation
    /// first so the previous refresh token is retired.
    async fn mint_pair(&self, account: &Account) -> ServiceResult<(String, String)> {
        let generation = self.repo.advance_refresh_generation(account.id).await?;
        let access = self.tokens.mint_access(account)?;
        let refresh = self.tokens.mint_refresh(account, generation)?;
        Ok((access, refresh))
    }

    /// Token-issuance gate shared by Login and RefreshToken
    fn check_may_hold_tokens(&self, account: &Account) -> ServiceResult<()> {
        match account.status {
            AccountStatus::Suspended | AccountStatus::Inactive => Err(ServiceError::InvalidToken),
            AccountStatus::Pending if self.require_verified_login && !account.email_verified => {
                Err(ServiceError::InvalidToken)
            }
            _ => Ok(()),
        }
    }
}

/// Submit a notification send as a detached task. The originating request
/// never waits on it and never sees its failure.
fn dispatch<F>(what: &'static str, fut: F)
where
    F: Future<Output = ServiceResult<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = fut.await {
            tracing::warn!(notification = what, error = %e, "notification delivery failed");
        }
    });
}
