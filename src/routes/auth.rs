use actix_web::{web, HttpResponse};
use anyhow::Context;
use chrono::Utc;
use secrecy::Secret;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::{
    compute_password_hash, issue_token, validate_creds, AuthContext, AuthError, Credentials,
    JwtSecret, TokenTtl,
};
use crate::errors::ApiError;
use crate::models::user::{Role, UserRecord, UserSummary};
use crate::slots::SlotLedger;
use crate::telemetry::spawn_blocking_with_tracing;

#[derive(serde::Deserialize)]
pub struct RegisterBody {
    pub name: String,
    pub email: String,
    pub password: Secret<String>,
    pub role: Option<String>,
    pub specialization: Option<String>,
}

#[derive(serde::Deserialize)]
pub struct LoginBody {
    pub email: String,
    pub password: Secret<String>,
}

#[tracing::instrument(
    name = "Registering a new account",
    skip(body, pool, secret, ttl),
    fields(email = %body.email)
)]
pub async fn register(
    body: web::Json<RegisterBody>,
    pool: web::Data<PgPool>,
    secret: web::Data<JwtSecret>,
    ttl: web::Data<TokenTtl>,
) -> Result<HttpResponse, ApiError> {
    let RegisterBody {
        name,
        email,
        password,
        role,
        specialization,
    } = body.into_inner();
    if name.trim().is_empty() || email.trim().is_empty() {
        return Err(ApiError::Validation(
            "Please provide all required fields".to_string(),
        ));
    }
    let role = role
        .as_deref()
        .unwrap_or("user")
        .parse::<Role>()
        .map_err(|e| ApiError::Validation(e.to_string()))?;
    // Specialization only applies to doctor accounts.
    let specialization = match role {
        Role::Doctor => specialization,
        _ => None,
    };

    let password_hash = spawn_blocking_with_tracing(move || compute_password_hash(password))
        .await
        .context("Failed to spawn a blocking task")??;

    let user = insert_user(&pool, &name, &email, password_hash, role, specialization).await?;

    let token = issue_token(user.id, user.role, &secret.0, ttl.0)?;
    Ok(HttpResponse::Created().json(json!({
        "message": "User registered successfully",
        "token": token,
        "user": user,
    })))
}

#[tracing::instrument(name = "Logging in", skip(body, pool, secret, ttl), fields(email = %body.email))]
pub async fn login(
    body: web::Json<LoginBody>,
    pool: web::Data<PgPool>,
    secret: web::Data<JwtSecret>,
    ttl: web::Data<TokenTtl>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    let credentials = Credentials {
        email: body.email,
        password: body.password,
    };

    let (user_id, role) = validate_creds(credentials, &pool).await.map_err(|e| match e {
        AuthError::InvalidCredentials(_) => {
            ApiError::Validation("Invalid email or password".to_string())
        }
        AuthError::UnexpectedError(source) => ApiError::Unexpected(source),
    })?;

    let user = fetch_summary(&pool, user_id).await?;
    let token = issue_token(user_id, role, &secret.0, ttl.0)?;
    Ok(HttpResponse::Ok().json(json!({
        "message": "Login successful",
        "token": token,
        "user": user,
    })))
}

/// Current caller's profile; doctors additionally get their specialization
/// and slot ledger.
#[tracing::instrument(name = "Fetching own profile", skip(pool))]
pub async fn me(ctx: AuthContext, pool: web::Data<PgPool>) -> Result<HttpResponse, ApiError> {
    let user = fetch_record(&pool, ctx.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    let mut profile = json!({
        "id": user.id,
        "name": user.name,
        "email": user.email,
        "role": user.role,
    });
    if user.role == Role::Doctor {
        let slots = SlotLedger::new(&pool).slots_for(user.id).await?;
        profile["specialization"] = json!(user.specialization);
        profile["availableSlots"] = json!(slots);
    }
    Ok(HttpResponse::Ok().json(profile))
}

/// Admin listing of every account, credential hashes omitted.
#[tracing::instrument(name = "Listing all accounts", skip(pool))]
pub async fn list_all_users(
    ctx: AuthContext,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    ctx.require_role(&[Role::Admin])?;

    let users = sqlx::query_as::<_, UserRecord>(
        "SELECT id, name, email, role, specialization, created_at
         FROM users ORDER BY created_at DESC",
    )
    .fetch_all(pool.get_ref())
    .await
    .context("Failed to fetch users")?;
    Ok(HttpResponse::Ok().json(users))
}

pub(crate) async fn insert_user(
    pool: &PgPool,
    name: &str,
    email: &str,
    password_hash: Secret<String>,
    role: Role,
    specialization: Option<String>,
) -> Result<UserSummary, ApiError> {
    use secrecy::ExposeSecret;

    let id = Uuid::new_v4();
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO users (id, name, email, password_hash, role, specialization, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $7)",
    )
    .bind(id)
    .bind(name)
    .bind(email)
    .bind(password_hash.expose_secret())
    .bind(role.as_str())
    .bind(specialization)
    .bind(now)
    .execute(pool)
    .await
    .map_err(|e| {
        if let sqlx::Error::Database(db) = &e {
            if db.is_unique_violation() {
                return ApiError::Conflict("User with this email already exists".to_string());
            }
        }
        ApiError::Unexpected(anyhow::Error::from(e).context("Failed to insert user"))
    })?;

    Ok(UserSummary {
        id,
        name: name.to_string(),
        email: email.to_string(),
        role,
    })
}

async fn fetch_record(pool: &PgPool, id: Uuid) -> Result<Option<UserRecord>, anyhow::Error> {
    sqlx::query_as::<_, UserRecord>(
        "SELECT id, name, email, role, specialization, created_at FROM users WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to fetch user")
}

async fn fetch_summary(pool: &PgPool, id: Uuid) -> Result<UserSummary, ApiError> {
    let user = fetch_record(pool, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;
    Ok(UserSummary {
        id: user.id,
        name: user.name,
        email: user.email,
        role: user.role,
    })
}
