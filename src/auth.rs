/// Authentication extractors
use crate::{
    account::Role,
    context::AppContext,
    error::ServiceError,
    token::AccessClaims,
};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum::http::HeaderMap;

/// Pull the bearer token out of the Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|t| t.to_string())
}

/// Authenticated context, extracted from a verified access token
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub claims: AccessClaims,
}

impl AuthContext {
    pub fn account_id(&self) -> i64 {
        self.claims.sub
    }
}

#[async_trait]
impl FromRequestParts<AppContext> for AuthContext {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_bearer_token(&parts.headers).ok_or(ServiceError::InvalidToken)?;
        let claims = state.tokens.verify_access(&token)?;
        Ok(AuthContext { claims })
    }
}

/// Authenticated context that additionally requires the admin role
#[derive(Debug, Clone)]
pub struct AdminContext {
    pub claims: AccessClaims,
}

#[async_trait]
impl FromRequestParts<AppContext> for AdminContext {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let auth = AuthContext::from_request_parts(parts, state).await?;
        if auth.claims.role != Role::Admin.as_str() {
            return Err(ServiceError::Forbidden("admin role required".to_string()));
        }
        Ok(AdminContext {
            claims: auth.claims,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::AUTHORIZATION;

    #[test]
    fn bearer_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer abc.def.ghi".parse().unwrap());
        assert_eq!(
            extract_bearer_token(&headers),
            Some("abc.def.ghi".to_string())
        );
    }

    #[test]
    fn missing_or_malformed_header_yields_none() {
        assert_eq!(extract_bearer_token(&HeaderMap::new()), None);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Basic dXNlcg==".parse().unwrap());
        assert_eq!(extract_bearer_token(&headers), None);
    }
}
