use actix_web::{web, HttpResponse};
use anyhow::Context;
use secrecy::Secret;
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;

use crate::auth::{compute_password_hash, issue_token, AuthContext, JwtSecret, TokenTtl};
use crate::errors::ApiError;
use crate::models::user::{DaySlots, Role, UserRecord};
use crate::routes::appointments::slots_grouped_by_doctor;
use crate::slots::SlotLedger;
use crate::telemetry::spawn_blocking_with_tracing;
use crate::utils::{total_pages, Page};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDoctorBody {
    pub name: String,
    pub email: String,
    pub password: Secret<String>,
    pub specialization: String,
    pub available_slots: Option<Vec<DaySlots>>,
}

/// Admin provisions a doctor account, optionally seeding its slot ledger.
#[tracing::instrument(name = "Creating a doctor account", skip(body, pool, secret, ttl))]
pub async fn create_doctor(
    ctx: AuthContext,
    body: web::Json<CreateDoctorBody>,
    pool: web::Data<PgPool>,
    secret: web::Data<JwtSecret>,
    ttl: web::Data<TokenTtl>,
) -> Result<HttpResponse, ApiError> {
    ctx.require_role(&[Role::Admin])?;
    let CreateDoctorBody {
        name,
        email,
        password,
        specialization,
        available_slots,
    } = body.into_inner();
    if name.trim().is_empty() || email.trim().is_empty() || specialization.trim().is_empty() {
        return Err(ApiError::Validation(
            "Please provide all required fields".to_string(),
        ));
    }

    let password_hash = spawn_blocking_with_tracing(move || compute_password_hash(password))
        .await
        .context("Failed to spawn a blocking task")??;

    let doctor = super::auth::insert_user(
        &pool,
        &name,
        &email,
        password_hash,
        Role::Doctor,
        Some(specialization.clone()),
    )
    .await?;

    let ledger = SlotLedger::new(&pool);
    for entry in available_slots.unwrap_or_default() {
        ledger.upsert_date(doctor.id, entry.date, entry.times).await?;
    }

    let token = issue_token(doctor.id, Role::Doctor, &secret.0, ttl.0)?;
    Ok(HttpResponse::Created().json(json!({
        "message": "Doctor account created successfully",
        "doctor": {
            "id": doctor.id,
            "name": doctor.name,
            "email": doctor.email,
            "role": Role::Doctor,
            "specialization": specialization,
        },
        "token": token,
    })))
}

/// Public directory of every doctor account.
#[tracing::instrument(name = "Listing doctors", skip(pool))]
pub async fn list_doctors(pool: web::Data<PgPool>) -> Result<HttpResponse, ApiError> {
    let doctors = sqlx::query_as::<_, UserRecord>(
        "SELECT id, name, email, role, specialization, created_at
         FROM users WHERE role = 'doctor' ORDER BY created_at DESC",
    )
    .fetch_all(pool.get_ref())
    .await
    .context("Failed to fetch doctors")?;
    Ok(HttpResponse::Ok().json(json!({ "doctors": doctors })))
}

#[derive(Deserialize)]
pub struct DoctorSearchFilters {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
    pub specialization: Option<String>,
}

/// Public paginated doctor search with name/email substring matching and an
/// exact specialization filter.
#[tracing::instrument(name = "Searching doctors", skip(pool, filters))]
pub async fn search_doctors(
    filters: web::Query<DoctorSearchFilters>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    let filters = filters.into_inner();
    let (doctors, total, page) = filtered_users(
        &pool,
        Some(Role::Doctor),
        filters.search,
        filters.specialization,
        Page::new(filters.page, filters.limit),
    )
    .await?;

    Ok(HttpResponse::Ok().json(json!({
        "doctors": doctors,
        "totalPages": total_pages(total, page.limit),
        "currentPage": page.page,
        "totalResults": total,
    })))
}

/// Admin listing of plain user accounts (no doctors, no admins).
#[tracing::instrument(name = "Listing patient accounts", skip(pool))]
pub async fn list_patients(
    ctx: AuthContext,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    ctx.require_role(&[Role::Admin])?;
    let users = sqlx::query_as::<_, UserRecord>(
        "SELECT id, name, email, role, specialization, created_at
         FROM users WHERE role = 'user' ORDER BY created_at DESC",
    )
    .fetch_all(pool.get_ref())
    .await
    .context("Failed to fetch users")?;
    Ok(HttpResponse::Ok().json(json!({ "users": users })))
}

#[derive(Deserialize)]
pub struct UserSearchFilters {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
    pub role: Option<String>,
}

/// Admin paginated account search, filterable by role.
#[tracing::instrument(name = "Filtering accounts", skip(pool, filters))]
pub async fn admin_filtered_users(
    ctx: AuthContext,
    filters: web::Query<UserSearchFilters>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    ctx.require_role(&[Role::Admin])?;
    let filters = filters.into_inner();
    let role = filters
        .role
        .as_deref()
        .filter(|r| !r.is_empty())
        .map(str::parse::<Role>)
        .transpose()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let (users, total, page) = filtered_users(
        &pool,
        role,
        filters.search,
        None,
        Page::new(filters.page, filters.limit),
    )
    .await?;

    Ok(HttpResponse::Ok().json(json!({
        "users": users,
        "totalPages": total_pages(total, page.limit),
        "currentPage": page.page,
        "totalResults": total,
    })))
}

/// Admin paginated doctor search; same filters as the public endpoint.
#[tracing::instrument(name = "Filtering doctors", skip(pool, filters))]
pub async fn admin_filtered_doctors(
    ctx: AuthContext,
    filters: web::Query<DoctorSearchFilters>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    ctx.require_role(&[Role::Admin])?;
    let filters = filters.into_inner();
    let (doctors, total, page) = filtered_users(
        &pool,
        Some(Role::Doctor),
        filters.search,
        filters.specialization,
        Page::new(filters.page, filters.limit),
    )
    .await?;

    Ok(HttpResponse::Ok().json(json!({
        "doctors": doctors,
        "totalPages": total_pages(total, page.limit),
        "currentPage": page.page,
        "totalResults": total,
    })))
}

/// Admin inventory of every doctor's published slots.
#[tracing::instrument(name = "Listing slot inventory", skip(pool))]
pub async fn available_appointments(
    ctx: AuthContext,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    ctx.require_role(&[Role::Admin])?;

    let doctors = sqlx::query_as::<_, UserRecord>(
        "SELECT u.id, u.name, u.email, u.role, u.specialization, u.created_at
         FROM users u
         WHERE u.role = 'doctor'
           AND EXISTS (
               SELECT 1 FROM doctor_slots s
               WHERE s.doctor_id = u.id AND cardinality(s.times) > 0
           )
         ORDER BY u.name",
    )
    .fetch_all(pool.get_ref())
    .await
    .context("Failed to fetch doctors with slots")?;

    let slots_by_doctor = slots_grouped_by_doctor(
        pool.get_ref(),
        doctors.iter().map(|d| d.id).collect::<Vec<_>>(),
    )
    .await?;

    let appointments: Vec<_> = doctors
        .into_iter()
        .map(|d| {
            let slots = slots_by_doctor.get(&d.id).cloned().unwrap_or_default();
            json!({
                "doctorId": d.id,
                "doctorName": d.name,
                "specialization": d.specialization,
                "email": d.email,
                "availableSlots": slots,
            })
        })
        .collect();
    Ok(HttpResponse::Ok().json(json!({ "appointments": appointments })))
}

async fn filtered_users(
    pool: &PgPool,
    role: Option<Role>,
    search: Option<String>,
    specialization: Option<String>,
    page: Page,
) -> Result<(Vec<UserRecord>, i64, Page), ApiError> {
    let role = role.map(|r| r.as_str().to_string());
    let search = search.filter(|s| !s.is_empty()).map(|s| format!("%{s}%"));
    let specialization = specialization.filter(|s| !s.is_empty());

    let predicate = "FROM users
         WHERE ($1::text IS NULL OR role = $1)
           AND ($2::text IS NULL OR specialization = $2)
           AND ($3::text IS NULL OR name ILIKE $3 OR email ILIKE $3)";

    let listing = format!(
        "SELECT id, name, email, role, specialization, created_at {predicate}
         ORDER BY created_at DESC LIMIT $4 OFFSET $5"
    );
    let users = sqlx::query_as::<_, UserRecord>(&listing)
        .bind(&role)
        .bind(&specialization)
        .bind(&search)
        .bind(page.limit)
        .bind(page.offset())
        .fetch_all(pool)
        .await
        .context("Failed to fetch filtered accounts")?;

    let count = format!("SELECT COUNT(*) {predicate}");
    let (total,): (i64,) = sqlx::query_as(&count)
        .bind(&role)
        .bind(&specialization)
        .bind(&search)
        .fetch_one(pool)
        .await
        .context("Failed to count filtered accounts")?;

    Ok((users, total, page))
}
