use std::future::Future;
use std::pin::Pin;

use actix_web::dev::Payload;
use actix_web::http::header;
use actix_web::{web, FromRequest, HttpRequest};
use anyhow::Context;
use secrecy::Secret;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::token::decode_token;
use crate::errors::ApiError;
use crate::models::user::Role;

/// Signing key for bearer tokens, registered as app data at startup.
#[derive(Clone)]
pub struct JwtSecret(pub Secret<String>);

/// Lifetime for issued bearer tokens, in hours.
#[derive(Clone, Copy)]
pub struct TokenTtl(pub i64);

/// The resolved identity of the caller, threaded explicitly into every
/// handler and engine call. Extraction fails with a 401 when the bearer
/// header is absent, malformed, or points at a deleted account. The role is
/// re-read from the store rather than trusted from the token.
#[derive(Debug, Clone, Copy)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub role: Role,
}

impl AuthContext {
    pub fn require_role(&self, allowed: &[Role]) -> Result<(), ApiError> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(ApiError::Forbidden(
                "You do not have permission to perform this action".to_string(),
            ))
        }
    }
}

impl FromRequest for AuthContext {
    type Error = ApiError;
    type Future = Pin<Box<dyn Future<Output = Result<AuthContext, ApiError>>>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let pool = req.app_data::<web::Data<PgPool>>().cloned();
        let secret = req.app_data::<web::Data<JwtSecret>>().cloned();
        let header = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(ToOwned::to_owned);

        Box::pin(async move {
            let pool = pool.context("Database pool missing from app data")?;
            let secret = secret.context("JWT secret missing from app data")?;

            let token = header
                .as_deref()
                .and_then(|value| value.strip_prefix("Bearer "))
                .ok_or_else(|| {
                    ApiError::Unauthenticated("Not authorized, no token provided".to_string())
                })?;

            let claims = decode_token(token, &secret.0)
                .map_err(|_| ApiError::Unauthenticated("Not authorized".to_string()))?;

            let role: Option<(String,)> = sqlx::query_as("SELECT role FROM users WHERE id = $1")
                .bind(claims.sub)
                .fetch_optional(pool.get_ref())
                .await
                .context("Failed to query the token's subject")?;
            let role = role
                .ok_or_else(|| ApiError::Unauthenticated("User not found".to_string()))?
                .0
                .parse::<Role>()
                .context("Corrupt role column")?;

            Ok(AuthContext {
                user_id: claims.sub,
                role,
            })
        })
    }
}
