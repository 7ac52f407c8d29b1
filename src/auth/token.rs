use anyhow::Context;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, Secret};
use uuid::Uuid;

use crate::models::user::Role;

#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: Role,
    pub exp: usize,
}

pub fn issue_token(
    user_id: Uuid,
    role: Role,
    secret: &Secret<String>,
    ttl_hours: i64,
) -> Result<String, anyhow::Error> {
    let exp = Utc::now() + Duration::hours(ttl_hours);
    let claims = Claims {
        sub: user_id,
        role,
        exp: exp.timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.expose_secret().as_bytes()),
    )
    .context("Failed to sign bearer token")
}

pub fn decode_token(token: &str, secret: &Secret<String>) -> Result<Claims, anyhow::Error> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.expose_secret().as_bytes()),
        &Validation::default(),
    )
    .context("Failed to validate bearer token")?;
    Ok(data.claims)
}
