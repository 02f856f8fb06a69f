/// HTTP API surface
///
/// Thin handlers over [`AccountService`]: deserialize, delegate, serialize.
/// All policy (validation ordering, information hiding, token rotation)
/// lives in the service; nothing here inspects passwords or tokens beyond
/// the extractors in [`crate::auth`].
use crate::{
    account::{
        AccountListResponse, AccountView, ChangePasswordRequest, CreateUserRequest,
        ForgotPasswordRequest, GenericResponse, LoginRequest, LoginResponse, RefreshTokenRequest,
        RegisterRequest, RegisterResponse, ResendVerificationRequest, ResetPasswordRequest,
        SearchParams, TokenPairResponse, UpdateStatusRequest, UpdateUserRequest,
        ValidateTokenRequest, ValidateTokenResponse, VerifyEmailRequest,
    },
    auth::{AdminContext, AuthContext},
    context::AppContext,
    error::ServiceResult,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;

/// Assemble the full route table
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/health", get(health))
        .route("/accounts/register", post(register))
        .route("/accounts/login", post(login))
        .route("/accounts/logout", post(logout))
        .route("/accounts/refresh-token", post(refresh_token))
        .route("/accounts/validate-token", post(validate_token))
        .route("/accounts/forgot-password", post(forgot_password))
        .route("/accounts/reset-password", post(reset_password))
        .route("/accounts/verify-email", post(verify_email))
        .route("/accounts/resend-verification", post(resend_verification))
        .route("/accounts", post(create_user).get(list_users))
        .route("/accounts/search", get(search_users))
        .route(
            "/accounts/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
        .route("/accounts/:id/status", put(update_status))
        .route("/accounts/:id/password", put(change_password))
        .route("/accounts/email/:email", get(get_user_by_email))
        .route("/accounts/role/:role", get(users_by_role))
        .route("/accounts/branch/:branch_id", get(users_by_branch))
}

async fn health(State(ctx): State<AppContext>) -> ServiceResult<Json<serde_json::Value>> {
    crate::db::test_connection(&ctx.db).await?;
    Ok(Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    })))
}

// --- authentication ------------------------------------------------------

async fn register(
    State(ctx): State<AppContext>,
    Json(req): Json<RegisterRequest>,
) -> ServiceResult<(StatusCode, Json<RegisterResponse>)> {
    let res = ctx.accounts.register(req).await?;
    Ok((StatusCode::CREATED, Json(res)))
}

async fn login(
    State(ctx): State<AppContext>,
    Json(req): Json<LoginRequest>,
) -> ServiceResult<Json<LoginResponse>> {
    Ok(Json(ctx.accounts.login(req).await?))
}

async fn logout(
    State(ctx): State<AppContext>,
    _auth: AuthContext,
) -> ServiceResult<Json<GenericResponse>> {
    Ok(Json(ctx.accounts.logout().await?))
}

async fn refresh_token(
    State(ctx): State<AppContext>,
    Json(req): Json<RefreshTokenRequest>,
) -> ServiceResult<Json<TokenPairResponse>> {
    Ok(Json(ctx.accounts.refresh_token(req).await?))
}

async fn validate_token(
    State(ctx): State<AppContext>,
    Json(req): Json<ValidateTokenRequest>,
) -> ServiceResult<Json<ValidateTokenResponse>> {
    Ok(Json(ctx.accounts.validate_token(req).await?))
}

async fn forgot_password(
    State(ctx): State<AppContext>,
    Json(req): Json<ForgotPasswordRequest>,
) -> ServiceResult<Json<GenericResponse>> {
    Ok(Json(ctx.accounts.forgot_password(req).await?))
}

async fn reset_password(
    State(ctx): State<AppContext>,
    Json(req): Json<ResetPasswordRequest>,
) -> ServiceResult<Json<GenericResponse>> {
    Ok(Json(ctx.accounts.reset_password(req).await?))
}

async fn verify_email(
    State(ctx): State<AppContext>,
    Json(req): Json<VerifyEmailRequest>,
) -> ServiceResult<Json<GenericResponse>> {
    Ok(Json(ctx.accounts.verify_email(req).await?))
}

async fn resend_verification(
    State(ctx): State<AppContext>,
    Json(req): Json<ResendVerificationRequest>,
) -> ServiceResult<Json<GenericResponse>> {
    Ok(Json(ctx.accounts.resend_verification(req).await?))
}

/// Password change is self-service; admins may change any account's
/// password given its current one.
async fn change_password(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(id): Path<i64>,
    Json(req): Json<ChangePasswordRequest>,
) -> ServiceResult<Json<GenericResponse>> {
    if auth.account_id() != id && auth.claims.role != crate::account::Role::Admin.as_str() {
        return Err(crate::error::ServiceError::Forbidden(
            "cannot change another account's password".to_string(),
        ));
    }
    Ok(Json(ctx.accounts.change_password(id, req).await?))
}

// --- account management --------------------------------------------------

async fn get_user_by_email(
    State(ctx): State<AppContext>,
    _admin: AdminContext,
    Path(email): Path<String>,
) -> ServiceResult<Json<AccountView>> {
    Ok(Json(ctx.accounts.find_by_email(&email).await?))
}

async fn create_user(
    State(ctx): State<AppContext>,
    _admin: AdminContext,
    Json(req): Json<CreateUserRequest>,
) -> ServiceResult<(StatusCode, Json<AccountView>)> {
    let view = ctx.accounts.create_user(req).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    #[serde(default = "default_page")]
    page: u32,
    #[serde(default = "default_page_size")]
    page_size: u32,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    20
}

async fn list_users(
    State(ctx): State<AppContext>,
    _admin: AdminContext,
    Query(params): Query<ListParams>,
) -> ServiceResult<Json<AccountListResponse>> {
    Ok(Json(ctx.accounts.list(params.page, params.page_size).await?))
}

async fn search_users(
    State(ctx): State<AppContext>,
    _admin: AdminContext,
    Query(params): Query<SearchParams>,
) -> ServiceResult<Json<Vec<AccountView>>> {
    Ok(Json(ctx.accounts.search(params).await?))
}

async fn get_user(
    State(ctx): State<AppContext>,
    _admin: AdminContext,
    Path(id): Path<i64>,
) -> ServiceResult<Json<AccountView>> {
    Ok(Json(ctx.accounts.find_by_id(id).await?))
}

async fn update_user(
    State(ctx): State<AppContext>,
    _admin: AdminContext,
    Path(id): Path<i64>,
    Json(req): Json<UpdateUserRequest>,
) -> ServiceResult<Json<AccountView>> {
    Ok(Json(ctx.accounts.update_user(id, req).await?))
}

async fn delete_user(
    State(ctx): State<AppContext>,
    _admin: AdminContext,
    Path(id): Path<i64>,
) -> ServiceResult<Json<GenericResponse>> {
    ctx.accounts.delete_user(id).await?;
    Ok(Json(GenericResponse {
        success: true,
        message: "Account deleted".to_string(),
    }))
}

async fn update_status(
    State(ctx): State<AppContext>,
    _admin: AdminContext,
    Path(id): Path<i64>,
    Json(req): Json<UpdateStatusRequest>,
) -> ServiceResult<Json<AccountView>> {
    Ok(Json(ctx.accounts.update_status(id, req).await?))
}

async fn users_by_role(
    State(ctx): State<AppContext>,
    _admin: AdminContext,
    Path(role): Path<String>,
) -> ServiceResult<Json<Vec<AccountView>>> {
    Ok(Json(ctx.accounts.find_by_role(&role).await?))
}

async fn users_by_branch(
    State(ctx): State<AppContext>,
    _admin: AdminContext,
    Path(branch_id): Path<i64>,
) -> ServiceResult<Json<Vec<AccountView>>> {
    Ok(Json(ctx.accounts.find_by_branch(branch_id).await?))
}
