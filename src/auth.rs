use actix_web::{dev::Payload, Error, FromRequest, HttpRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::env;
use std::future::{ready, Ready};
use utoipa::ToSchema;

use crate::models::{Id, User};
use crate::repo::Repo;

/// Access-token lifetime. Deliberately short; a fresh one is minted from the
/// refresh token.
pub const ACCESS_TTL_MINUTES: i64 = 15;
/// Refresh-token lifetime.
pub const REFRESH_TTL_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "postgres-store", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres-store",
    sqlx(type_name = "user_role", rename_all = "lowercase")
)]
pub enum Role {
    Admin,
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Id,
    pub email: String,
    pub role: Role,
    pub exp: usize,
    /// Random per-token id so a rotated pair never repeats the previous
    /// token strings even within the same second.
    pub jti: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    // never distinguishes unknown email from wrong password
    #[error("invalid credentials")] InvalidCredentials,
    #[error("invalid token")] InvalidToken,
    #[error("invalid refresh token")] InvalidRefreshToken,
    #[error("internal: {0}")] Internal(String),
}

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AuthError::Internal(e.to_string()))
}

/// Constant-time verification via argon2's PHC comparison.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

fn secret() -> String {
    env::var("JWT_SECRET").expect("JWT_SECRET not set")
}

/// Validate a JWT and return its claims.
fn decode_jwt(token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret().as_bytes()),
        &validation,
    )?;
    Ok(data.claims)
}

fn sign_for(user: &User, ttl: chrono::Duration) -> Result<String, AuthError> {
    let expiration = chrono::Utc::now()
        .checked_add_signed(ttl)
        .ok_or_else(|| AuthError::Internal("expiry overflow".into()))?
        .timestamp() as usize;
    let claims = Claims {
        sub: user.id,
        email: user.email.clone(),
        role: user.role,
        exp: expiration,
        jti: uuid::Uuid::new_v4().to_string(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret().as_bytes()),
    )
    .map_err(|e| AuthError::Internal(e.to_string()))
}

/// Mint a fresh access + refresh pair for a user.
pub fn issue_pair(user: &User) -> Result<TokenPair, AuthError> {
    Ok(TokenPair {
        access_token: sign_for(user, chrono::Duration::minutes(ACCESS_TTL_MINUTES))?,
        refresh_token: sign_for(user, chrono::Duration::days(REFRESH_TTL_DAYS))?,
    })
}

/// Look up the non-deleted user by email and verify the password. The
/// returned user still carries its hash; callers serialize through models
/// that skip it.
pub async fn validate_credentials(
    repo: &dyn Repo,
    email: &str,
    password: &str,
) -> Result<User, AuthError> {
    let user = repo
        .find_user_by_email(email)
        .await
        .map_err(|_| AuthError::InvalidCredentials)?;
    if !verify_password(password, &user.password_hash) {
        return Err(AuthError::InvalidCredentials);
    }
    Ok(user)
}

/// Credential login: mints a token pair and persists the refresh token on the
/// user row, overwriting any previous one.
pub async fn login(repo: &dyn Repo, email: &str, password: &str) -> Result<TokenPair, AuthError> {
    let user = validate_credentials(repo, email, password).await?;
    let pair = issue_pair(&user)?;
    repo.set_refresh_token(user.id, &pair.refresh_token)
        .await
        .map_err(|e| AuthError::Internal(e.to_string()))?;
    Ok(pair)
}

/// Verify a refresh token and rotate: a new pair is minted and the new
/// refresh token replaces the stored one, so the presented token no longer
/// matches after this call. Every inner failure collapses to one error kind;
/// the caller learns nothing about which check failed.
pub async fn refresh(repo: &dyn Repo, presented: &str) -> Result<TokenPair, AuthError> {
    let claims = decode_jwt(presented).map_err(|_| AuthError::InvalidRefreshToken)?;
    let user = repo
        .find_user(claims.sub)
        .await
        .map_err(|_| AuthError::InvalidRefreshToken)?;
    let pair = issue_pair(&user)?;
    repo.set_refresh_token(user.id, &pair.refresh_token)
        .await
        .map_err(|_| AuthError::InvalidRefreshToken)?;
    Ok(pair)
}

/// Extractor yielding validated access-token `Claims`.
pub struct Auth(pub Claims);

impl FromRequest for Auth {
    type Error = Error;
    type Future = Ready<Result<Self, Error>>;

    fn from_request(req: &HttpRequest, pl: &mut Payload) -> Self::Future {
        // Delegate to BearerAuth to parse the header.
        if let Ok(bearer) = BearerAuth::from_request(req, pl).into_inner() {
            match decode_jwt(bearer.token()) {
                Ok(claims) => return ready(Ok(Auth(claims))),
                Err(_) => return ready(Err(actix_web::error::ErrorUnauthorized("Invalid JWT"))),
            }
        }
        ready(Err(actix_web::error::ErrorUnauthorized(
            "Authorization required",
        )))
    }
}
