use anyhow::Context;
use chrono::{NaiveDate, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::errors::ApiError;
use crate::models::appointment::{
    check_transition, Actor, Appointment, AppointmentStatus, TransitionError,
};
use crate::models::user::Role;
use crate::slots::SlotLedger;
use crate::utils::error_chain_fmt;

#[derive(thiserror::Error)]
pub enum BookingError {
    #[error("Invalid doctor")]
    InvalidDoctor,
    #[error("This slot is not available")]
    SlotUnavailable,
    #[error("This slot is already booked. Please choose another time.")]
    SlotTaken,
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl std::fmt::Debug for BookingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl From<BookingError> for ApiError {
    fn from(e: BookingError) -> Self {
        match e {
            BookingError::InvalidDoctor | BookingError::SlotUnavailable => {
                ApiError::Validation(e.to_string())
            }
            BookingError::SlotTaken => ApiError::Conflict(e.to_string()),
            BookingError::Unexpected(source) => ApiError::Unexpected(source),
        }
    }
}

/// Books a pending appointment for `patient_id` against a published slot.
///
/// Preconditions run in order and short-circuit: the target must be a
/// doctor, the ledger must contain the `(date, time)` pair, and no live
/// appointment may already occupy it. The conflict check races against
/// concurrent bookings, so the insert additionally maps a unique-index
/// violation on `(doctor, date, time)` to [`BookingError::SlotTaken`].
#[tracing::instrument(name = "Booking a new appointment", skip(pool, reason))]
pub async fn book(
    pool: &PgPool,
    patient_id: Uuid,
    doctor_id: Uuid,
    date: NaiveDate,
    time: &str,
    reason: &str,
) -> Result<Appointment, BookingError> {
    let doctor_role: Option<(String,)> = sqlx::query_as("SELECT role FROM users WHERE id = $1")
        .bind(doctor_id)
        .fetch_optional(pool)
        .await
        .context("Failed to query the target doctor")?;
    match doctor_role {
        Some((role,)) if role == Role::Doctor.as_str() => {}
        _ => return Err(BookingError::InvalidDoctor),
    }

    let ledger = SlotLedger::new(pool);
    if !ledger.has_slot(doctor_id, date, time).await? {
        return Err(BookingError::SlotUnavailable);
    }

    let (taken,): (bool,) = sqlx::query_as(
        "SELECT EXISTS (
             SELECT 1 FROM appointments
             WHERE doctor_id = $1 AND date = $2 AND time = $3
               AND status IN ('pending', 'confirmed')
         )",
    )
    .bind(doctor_id)
    .bind(date)
    .bind(time)
    .fetch_one(pool)
    .await
    .context("Failed to check for conflicting appointments")?;
    if taken {
        return Err(BookingError::SlotTaken);
    }

    let now = Utc::now();
    sqlx::query_as::<_, Appointment>(
        "INSERT INTO appointments
             (id, patient_id, doctor_id, date, time, status, reason, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, 'pending', $6, $7, $7)
         RETURNING id, patient_id, doctor_id, date, time, status, reason, notes,
                   created_at, updated_at",
    )
    .bind(Uuid::new_v4())
    .bind(patient_id)
    .bind(doctor_id)
    .bind(date)
    .bind(time)
    .bind(reason)
    .bind(now)
    .fetch_one(pool)
    .await
    .map_err(|e| {
        if let sqlx::Error::Database(db) = &e {
            if db.is_unique_violation() {
                return BookingError::SlotTaken;
            }
        }
        anyhow::Error::from(e)
            .context("Failed to insert appointment")
            .into()
    })
}

/// Doctor decision on a pending appointment: confirm or reject. The actor
/// must be the appointment's assigned doctor.
#[tracing::instrument(name = "Updating appointment status", skip(pool, notes))]
pub async fn set_status(
    pool: &PgPool,
    ctx: &AuthContext,
    appointment_id: Uuid,
    new_status: AppointmentStatus,
    notes: Option<String>,
) -> Result<Appointment, ApiError> {
    let appointment = load_appointment(pool, appointment_id).await?;
    let actor = actor_for(ctx, &appointment);

    check_transition(actor, appointment.status, new_status).map_err(|e| match e {
        TransitionError::Forbidden => {
            ApiError::Forbidden("You are not authorized to update this appointment".to_string())
        }
        TransitionError::Invalid { current } => {
            ApiError::Validation(format!("Cannot update an appointment that is already {current}"))
        }
    })?;

    apply_transition(pool, appointment_id, new_status, notes).await
}

/// Cancels a live appointment on behalf of the owning patient, the assigned
/// doctor, or an admin.
#[tracing::instrument(name = "Canceling appointment", skip(pool))]
pub async fn cancel(
    pool: &PgPool,
    ctx: &AuthContext,
    appointment_id: Uuid,
) -> Result<Appointment, ApiError> {
    let appointment = load_appointment(pool, appointment_id).await?;
    let actor = actor_for(ctx, &appointment);

    check_transition(actor, appointment.status, AppointmentStatus::Canceled).map_err(
        |e| match e {
            TransitionError::Forbidden => {
                ApiError::Forbidden("You are not authorized to cancel this appointment".to_string())
            }
            TransitionError::Invalid { current } => ApiError::Validation(format!(
                "Cannot cancel an appointment that is already {current}"
            )),
        },
    )?;

    apply_transition(pool, appointment_id, AppointmentStatus::Canceled, None).await
}

fn actor_for(ctx: &AuthContext, appointment: &Appointment) -> Actor {
    Actor {
        role: ctx.role,
        is_owner: appointment.patient_id == ctx.user_id,
        is_assigned_doctor: appointment.doctor_id == ctx.user_id,
    }
}

async fn load_appointment(pool: &PgPool, id: Uuid) -> Result<Appointment, ApiError> {
    sqlx::query_as::<_, Appointment>(
        "SELECT id, patient_id, doctor_id, date, time, status, reason, notes,
                created_at, updated_at
         FROM appointments WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to fetch appointment")?
    .ok_or_else(|| ApiError::NotFound("Appointment not found".to_string()))
}

async fn apply_transition(
    pool: &PgPool,
    id: Uuid,
    new_status: AppointmentStatus,
    notes: Option<String>,
) -> Result<Appointment, ApiError> {
    let updated = sqlx::query_as::<_, Appointment>(
        "UPDATE appointments
         SET status = $1, notes = COALESCE($2, notes), updated_at = $3
         WHERE id = $4
         RETURNING id, patient_id, doctor_id, date, time, status, reason, notes,
                   created_at, updated_at",
    )
    .bind(new_status.as_str())
    .bind(notes)
    .bind(Utc::now())
    .bind(id)
    .fetch_one(pool)
    .await
    .context("Failed to update appointment")?;
    Ok(updated)
}
