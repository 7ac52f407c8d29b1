use std::collections::HashMap;

use actix_web::{web, HttpResponse};
use anyhow::Context;
use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::booking;
use crate::errors::ApiError;
use crate::models::appointment::{AppointmentDetail, AppointmentStatus};
use crate::models::user::{DaySlots, Role};
use crate::slots::SlotLedger;
use crate::utils::{total_pages, Page};

const APPOINTMENT_DETAIL_COLUMNS: &str =
    "a.id, a.patient_id, a.doctor_id, a.date, a.time, a.status, a.reason, a.notes,
     p.name AS patient_name, p.email AS patient_email,
     d.name AS doctor_name, d.specialization AS doctor_specialization,
     a.created_at, a.updated_at";

#[derive(Deserialize)]
pub struct PublishSlotsBody {
    pub date: NaiveDate,
    pub times: Vec<String>,
}

/// Doctor publishes (or re-publishes) their availability for one date.
#[tracing::instrument(name = "Publishing slots", skip(body, pool), fields(doctor_id = %ctx.user_id))]
pub async fn publish_slots(
    ctx: AuthContext,
    body: web::Json<PublishSlotsBody>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    ctx.require_role(&[Role::Doctor])?;
    let body = body.into_inner();

    let slots = SlotLedger::new(&pool)
        .upsert_date(ctx.user_id, body.date, body.times)
        .await?;
    Ok(HttpResponse::Created().json(json!({
        "message": "Appointment slots added successfully",
        "availableSlots": slots,
    })))
}

#[derive(Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
struct DoctorDirectoryRow {
    id: Uuid,
    name: String,
    specialization: Option<String>,
}

/// Doctors that currently have at least one published slot entry.
#[tracing::instrument(name = "Listing available doctors", skip(pool))]
pub async fn available_doctors(
    _ctx: AuthContext,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    let doctors = sqlx::query_as::<_, DoctorDirectoryRow>(
        "SELECT u.id, u.name, u.specialization FROM users u
         WHERE u.role = 'doctor'
           AND EXISTS (
               SELECT 1 FROM doctor_slots s
               WHERE s.doctor_id = u.id AND cardinality(s.times) > 0
           )
         ORDER BY u.name",
    )
    .fetch_all(pool.get_ref())
    .await
    .context("Failed to fetch available doctors")?;

    let slots_by_doctor = slots_grouped_by_doctor(
        pool.get_ref(),
        doctors.iter().map(|d| d.id).collect::<Vec<_>>(),
    )
    .await?;

    let body: Vec<_> = doctors
        .into_iter()
        .map(|d| {
            let slots = slots_by_doctor.get(&d.id).cloned().unwrap_or_default();
            json!({
                "id": d.id,
                "name": d.name,
                "specialization": d.specialization,
                "availableSlots": slots,
            })
        })
        .collect();
    Ok(HttpResponse::Ok().json(body))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookBody {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub time: String,
    pub reason: String,
}

#[tracing::instrument(
    name = "Booking an appointment",
    skip(body, pool),
    fields(patient_id = %ctx.user_id, doctor_id = %body.doctor_id)
)]
pub async fn book_appointment(
    ctx: AuthContext,
    body: web::Json<BookBody>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    ctx.require_role(&[Role::User, Role::Admin])?;
    let body = body.into_inner();
    if body.reason.trim().is_empty() {
        return Err(ApiError::Validation("Reason is required".to_string()));
    }

    let appointment = booking::book(
        &pool,
        ctx.user_id,
        body.doctor_id,
        body.date,
        &body.time,
        &body.reason,
    )
    .await?;

    Ok(HttpResponse::Created().json(json!({
        "message": "Appointment booked successfully! Waiting for doctor's confirmation.",
        "appointment": appointment,
    })))
}

#[derive(Deserialize)]
pub struct StatusBody {
    pub status: String,
    pub notes: Option<String>,
}

/// Assigned doctor confirms or rejects a pending appointment.
#[tracing::instrument(name = "Deciding appointment", skip(body, pool), fields(actor = %ctx.user_id))]
pub async fn update_status(
    ctx: AuthContext,
    path: web::Path<Uuid>,
    body: web::Json<StatusBody>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    ctx.require_role(&[Role::Doctor])?;
    let body = body.into_inner();

    let new_status = body
        .status
        .parse::<AppointmentStatus>()
        .ok()
        .filter(|s| matches!(s, AppointmentStatus::Confirmed | AppointmentStatus::Rejected))
        .ok_or_else(|| ApiError::Validation("Invalid status".to_string()))?;

    let appointment =
        booking::set_status(&pool, &ctx, path.into_inner(), new_status, body.notes).await?;
    Ok(HttpResponse::Ok().json(json!({
        "message": format!("Appointment {}", appointment.status),
        "appointment": appointment,
    })))
}

#[tracing::instrument(name = "Canceling appointment", skip(pool), fields(actor = %ctx.user_id))]
pub async fn cancel_appointment(
    ctx: AuthContext,
    path: web::Path<Uuid>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    let appointment = booking::cancel(&pool, &ctx, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(json!({
        "message": "Appointment canceled successfully",
        "appointment": appointment,
    })))
}

/// Role-scoped listing: patients see their own bookings, doctors the ones
/// assigned to them, admins everything.
#[tracing::instrument(name = "Listing own appointments", skip(pool), fields(actor = %ctx.user_id))]
pub async fn my_appointments(
    ctx: AuthContext,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    let filter = match ctx.role {
        Role::User => "WHERE a.patient_id = $1",
        Role::Doctor => "WHERE a.doctor_id = $1",
        Role::Admin => "WHERE $1::uuid IS NOT NULL",
    };
    let query = format!(
        "SELECT {APPOINTMENT_DETAIL_COLUMNS}
         FROM appointments a
         JOIN users p ON p.id = a.patient_id
         JOIN users d ON d.id = a.doctor_id
         {filter}
         ORDER BY a.created_at DESC"
    );
    let appointments = sqlx::query_as::<_, AppointmentDetail>(&query)
        .bind(ctx.user_id)
        .fetch_all(pool.get_ref())
        .await
        .context("Failed to fetch appointments")?;
    Ok(HttpResponse::Ok().json(appointments))
}

/// Admin view over every appointment, newest first.
#[tracing::instrument(name = "Listing all appointments", skip(pool))]
pub async fn all_appointments(
    ctx: AuthContext,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    ctx.require_role(&[Role::Admin])?;

    let query = format!(
        "SELECT {APPOINTMENT_DETAIL_COLUMNS}
         FROM appointments a
         JOIN users p ON p.id = a.patient_id
         JOIN users d ON d.id = a.doctor_id
         ORDER BY a.created_at DESC"
    );
    let appointments = sqlx::query_as::<_, AppointmentDetail>(&query)
        .fetch_all(pool.get_ref())
        .await
        .context("Failed to fetch appointments")?;
    Ok(HttpResponse::Ok().json(appointments))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentFilters {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<String>,
    pub doctor_id: Option<Uuid>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub search: Option<String>,
}

/// Admin dashboard listing: filterable by status, doctor and date range,
/// with a case-insensitive substring search over the joined names/emails.
#[tracing::instrument(name = "Filtering appointments", skip(pool, filters))]
pub async fn admin_detailed_appointments(
    ctx: AuthContext,
    filters: web::Query<AppointmentFilters>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    ctx.require_role(&[Role::Admin])?;
    let filters = filters.into_inner();
    let page = Page::new(filters.page, filters.limit);

    let status = filters
        .status
        .as_deref()
        .map(|s| s.parse::<AppointmentStatus>())
        .transpose()
        .map_err(|e| ApiError::Validation(e.to_string()))?
        .map(|s| s.as_str().to_string());
    let search = filters
        .search
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{s}%"));

    let predicate = "FROM appointments a
         JOIN users p ON p.id = a.patient_id
         JOIN users d ON d.id = a.doctor_id
         WHERE ($1::text IS NULL OR a.status = $1)
           AND ($2::uuid IS NULL OR a.doctor_id = $2)
           AND ($3::date IS NULL OR a.date >= $3)
           AND ($4::date IS NULL OR a.date <= $4)
           AND ($5::text IS NULL
                OR p.name ILIKE $5 OR p.email ILIKE $5
                OR d.name ILIKE $5 OR d.email ILIKE $5)";

    let listing = format!(
        "SELECT {APPOINTMENT_DETAIL_COLUMNS} {predicate}
         ORDER BY a.created_at DESC LIMIT $6 OFFSET $7"
    );
    let appointments = sqlx::query_as::<_, AppointmentDetail>(&listing)
        .bind(&status)
        .bind(filters.doctor_id)
        .bind(filters.from)
        .bind(filters.to)
        .bind(&search)
        .bind(page.limit)
        .bind(page.offset())
        .fetch_all(pool.get_ref())
        .await
        .context("Failed to fetch filtered appointments")?;

    let count = format!("SELECT COUNT(*) {predicate}");
    let (total,): (i64,) = sqlx::query_as(&count)
        .bind(&status)
        .bind(filters.doctor_id)
        .bind(filters.from)
        .bind(filters.to)
        .bind(&search)
        .fetch_one(pool.get_ref())
        .await
        .context("Failed to count filtered appointments")?;

    Ok(HttpResponse::Ok().json(json!({
        "appointments": appointments,
        "totalPages": total_pages(total, page.limit),
        "currentPage": page.page,
        "totalResults": total,
    })))
}

#[derive(Serialize, sqlx::FromRow)]
struct StatusCount {
    status: String,
    count: i64,
}

#[derive(Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
struct DoctorCount {
    doctor_id: Uuid,
    doctor_name: String,
    count: i64,
}

#[derive(Serialize, sqlx::FromRow)]
struct DayCount {
    date: NaiveDate,
    count: i64,
}

/// Admin aggregate: appointments grouped by status and by doctor, plus the
/// booking volume of the last seven days bucketed by creation date.
#[tracing::instrument(name = "Computing appointment statistics", skip(pool))]
pub async fn admin_statistics(
    ctx: AuthContext,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    ctx.require_role(&[Role::Admin])?;

    let by_status = sqlx::query_as::<_, StatusCount>(
        "SELECT status, COUNT(*) AS count FROM appointments GROUP BY status ORDER BY status",
    )
    .fetch_all(pool.get_ref())
    .await
    .context("Failed to group appointments by status")?;

    let by_doctor = sqlx::query_as::<_, DoctorCount>(
        "SELECT d.id AS doctor_id, d.name AS doctor_name, COUNT(*) AS count
         FROM appointments a
         JOIN users d ON d.id = a.doctor_id
         GROUP BY d.id, d.name
         ORDER BY count DESC",
    )
    .fetch_all(pool.get_ref())
    .await
    .context("Failed to group appointments by doctor")?;

    let window_start = Utc::now() - Duration::days(7);
    let last_seven_days = sqlx::query_as::<_, DayCount>(
        "SELECT created_at::date AS date, COUNT(*) AS count
         FROM appointments
         WHERE created_at >= $1
         GROUP BY created_at::date
         ORDER BY date",
    )
    .bind(window_start)
    .fetch_all(pool.get_ref())
    .await
    .context("Failed to bucket recent appointments")?;

    Ok(HttpResponse::Ok().json(json!({
        "byStatus": by_status,
        "byDoctor": by_doctor,
        "last7Days": last_seven_days,
    })))
}

/// Single appointment; patients and doctors may only view their own.
#[tracing::instrument(name = "Fetching appointment detail", skip(pool), fields(actor = %ctx.user_id))]
pub async fn appointment_detail(
    ctx: AuthContext,
    path: web::Path<Uuid>,
    pool: web::Data<PgPool>,
) -> Result<HttpResponse, ApiError> {
    let query = format!(
        "SELECT {APPOINTMENT_DETAIL_COLUMNS}
         FROM appointments a
         JOIN users p ON p.id = a.patient_id
         JOIN users d ON d.id = a.doctor_id
         WHERE a.id = $1"
    );
    let appointment = sqlx::query_as::<_, AppointmentDetail>(&query)
        .bind(path.into_inner())
        .fetch_optional(pool.get_ref())
        .await
        .context("Failed to fetch appointment")?
        .ok_or_else(|| ApiError::NotFound("Appointment not found".to_string()))?;

    let may_view = match ctx.role {
        Role::Admin => true,
        Role::User => appointment.patient_id == ctx.user_id,
        Role::Doctor => appointment.doctor_id == ctx.user_id,
    };
    if !may_view {
        return Err(ApiError::Forbidden(
            "You don't have permission to view this appointment".to_string(),
        ));
    }
    Ok(HttpResponse::Ok().json(appointment))
}

pub(crate) async fn slots_grouped_by_doctor(
    pool: &PgPool,
    doctor_ids: Vec<Uuid>,
) -> Result<HashMap<Uuid, Vec<DaySlots>>, anyhow::Error> {
    #[derive(sqlx::FromRow)]
    struct SlotRow {
        doctor_id: Uuid,
        slot_date: NaiveDate,
        times: Vec<String>,
    }

    let rows = sqlx::query_as::<_, SlotRow>(
        "SELECT doctor_id, slot_date, times FROM doctor_slots
         WHERE doctor_id = ANY($1)
         ORDER BY slot_date",
    )
    .bind(&doctor_ids)
    .fetch_all(pool)
    .await
    .context("Failed to fetch slot ledger entries")?;

    let mut grouped: HashMap<Uuid, Vec<DaySlots>> = HashMap::new();
    for row in rows {
        grouped.entry(row.doctor_id).or_default().push(DaySlots {
            date: row.slot_date,
            times: row.times,
        });
    }
    Ok(grouped)
}
