/// Bearer-token minting and verification
///
/// Four token kinds are produced here: short-lived access tokens, rotating
/// refresh tokens, and single-use reset / verify tokens for the email-side
/// flows. All are HS256 JWTs carrying a `typ` claim so one kind can never be
/// presented as another. Signature verification happens before the expiry
/// check, so a tampered token never learns whether it had expired.
///
/// Refresh rotation uses a generation counter: each refresh token carries a
/// `gen` claim, and the account row stores the latest live generation. Any
/// mint on the login/refresh path advances the stored generation, which
/// retires every previously issued refresh token for that account.
use crate::{
    account::Account,
    config::JwtConfig,
    error::{ServiceError, ServiceResult},
};
use chrono::Utc;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Claims carried by an access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: i64,
    pub email: String,
    pub role: String,
    pub branch_id: i64,
    pub typ: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

/// Claims carried by a refresh token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: i64,
    pub email: String,
    /// Rotation generation; must match the account's stored generation
    pub gen: i64,
    pub typ: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

/// Claims carried by the single-use reset and verify tokens
///
/// These are not self-sufficient: the service additionally requires an
/// unconsumed record in the credential store before acting on one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneTimeClaims {
    pub email: String,
    pub typ: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

/// Token minting and verification, injected into the account service
pub trait TokenMinter: Send + Sync {
    fn mint_access(&self, account: &Account) -> ServiceResult<String>;
    fn mint_refresh(&self, account: &Account, generation: i64) -> ServiceResult<String>;
    fn mint_reset(&self, email: &str) -> ServiceResult<String>;
    fn mint_verify(&self, email: &str) -> ServiceResult<String>;

    fn verify_access(&self, token: &str) -> ServiceResult<AccessClaims>;
    fn verify_refresh(&self, token: &str) -> ServiceResult<RefreshClaims>;
    fn verify_reset(&self, token: &str) -> ServiceResult<OneTimeClaims>;
    fn verify_verify(&self, token: &str) -> ServiceResult<OneTimeClaims>;
}

/// HS256 JWT implementation of [`TokenMinter`]
pub struct JwtTokenMaker {
    encoding: EncodingKey,
    decoding: DecodingKey,
    config: JwtConfig,
    /// Verification token lifetime in seconds
    verification_ttl: i64,
}

impl JwtTokenMaker {
    pub fn new(config: JwtConfig, verification_ttl: i64) -> Self {
        let encoding = EncodingKey::from_secret(config.signing_secret.as_bytes());
        let decoding = DecodingKey::from_secret(config.signing_secret.as_bytes());
        Self {
            encoding,
            decoding,
            config,
            verification_ttl,
        }
    }

    fn sign<T: Serialize>(&self, claims: &T) -> ServiceResult<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| ServiceError::Internal(format!("Failed to sign token: {}", e)))
    }

    fn decode_checked<T: DeserializeOwned>(&self, token: &str) -> ServiceResult<T> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.config.issuer]);
        validation.leeway = 0;

        decode::<T>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => ServiceError::ExpiredToken,
                _ => ServiceError::InvalidToken,
            })
    }

    fn one_time_claims(&self, email: &str, typ: &str, ttl: i64) -> OneTimeClaims {
        let now = Utc::now().timestamp();
        OneTimeClaims {
            email: email.to_string(),
            typ: typ.to_string(),
            iss: self.config.issuer.clone(),
            iat: now,
            exp: now + ttl,
        }
    }
}

impl TokenMinter for JwtTokenMaker {
    fn mint_access(&self, account: &Account) -> ServiceResult<String> {
        let now = Utc::now().timestamp();
        self.sign(&AccessClaims {
            sub: account.id,
            email: account.email.clone(),
            role: account.role.as_str().to_string(),
            branch_id: account.branch_id,
            typ: "access".to_string(),
            iss: self.config.issuer.clone(),
            iat: now,
            exp: now + self.config.access_ttl,
        })
    }

    fn mint_refresh(&self, account: &Account, generation: i64) -> ServiceResult<String> {
        let now = Utc::now().timestamp();
        self.sign(&RefreshClaims {
            sub: account.id,
            email: account.email.clone(),
            gen: generation,
            typ: "refresh".to_string(),
            iss: self.config.issuer.clone(),
            iat: now,
            exp: now + self.config.refresh_ttl,
        })
    }

    fn mint_reset(&self, email: &str) -> ServiceResult<String> {
        self.sign(&self.one_time_claims(email, "reset", self.config.reset_ttl))
    }

    fn mint_verify(&self, email: &str) -> ServiceResult<String> {
        self.sign(&self.one_time_claims(email, "verify", self.verification_ttl))
    }

    fn verify_access(&self, token: &str) -> ServiceResult<AccessClaims> {
        let claims: AccessClaims = self.decode_checked(token)?;
        if claims.typ != "access" {
            return Err(ServiceError::InvalidToken);
        }
        Ok(claims)
    }

    fn verify_refresh(&self, token: &str) -> ServiceResult<RefreshClaims> {
        let claims: RefreshClaims = self.decode_checked(token)?;
        if claims.typ != "refresh" {
            return Err(ServiceError::InvalidToken);
        }
        Ok(claims)
    }

    fn verify_reset(&self, token: &str) -> ServiceResult<OneTimeClaims> {
        let claims: OneTimeClaims = self.decode_checked(token)?;
        if claims.typ != "reset" {
            return Err(ServiceError::InvalidToken);
        }
        Ok(claims)
    }

    fn verify_verify(&self, token: &str) -> ServiceResult<OneTimeClaims> {
        let claims: OneTimeClaims = self.decode_checked(token)?;
        if claims.typ != "verify" {
            return Err(ServiceError::InvalidToken);
        }
        Ok(claims)
    }
}
