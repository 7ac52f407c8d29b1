use anyhow::Context;
use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::ApiError;
use crate::models::user::{DaySlots, Role};

#[derive(Debug, thiserror::Error)]
pub enum SlotError {
    #[error("Doctor not found")]
    DoctorNotFound,
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl From<SlotError> for ApiError {
    fn from(e: SlotError) -> Self {
        match e {
            SlotError::DoctorNotFound => ApiError::NotFound(e.to_string()),
            SlotError::Unexpected(source) => ApiError::Unexpected(source),
        }
    }
}

/// Per-doctor calendar of published availability, keyed by date.
///
/// The ledger is advisory: booking does not remove entries, the booking
/// engine cross-checks live appointments to determine true vacancy.
pub struct SlotLedger<'a> {
    pool: &'a PgPool,
}

impl<'a> SlotLedger<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Replaces the published times for `(doctor_id, date)` wholesale; last
    /// writer wins, times are never merged across calls. Returns the
    /// doctor's full slot list ordered by date.
    #[tracing::instrument(name = "Upserting slot ledger entry", skip(self))]
    pub async fn upsert_date(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        times: Vec<String>,
    ) -> Result<Vec<DaySlots>, SlotError> {
        if !self.is_doctor(doctor_id).await? {
            return Err(SlotError::DoctorNotFound);
        }

        let mut times = times;
        times.sort();
        times.dedup();

        sqlx::query(
            "INSERT INTO doctor_slots (doctor_id, slot_date, times)
             VALUES ($1, $2, $3)
             ON CONFLICT (doctor_id, slot_date) DO UPDATE SET times = EXCLUDED.times",
        )
        .bind(doctor_id)
        .bind(date)
        .bind(&times)
        .execute(self.pool)
        .await
        .context("Failed to upsert slot ledger entry")?;

        Ok(self.slots_for(doctor_id).await?)
    }

    /// All published entries for one doctor, oldest date first.
    pub async fn slots_for(&self, doctor_id: Uuid) -> Result<Vec<DaySlots>, anyhow::Error> {
        sqlx::query_as::<_, DaySlots>(
            "SELECT slot_date, times FROM doctor_slots WHERE doctor_id = $1 ORDER BY slot_date",
        )
        .bind(doctor_id)
        .fetch_all(self.pool)
        .await
        .context("Failed to fetch slot ledger entries")
    }

    /// Whether the doctor has published `(date, time)`.
    pub async fn has_slot(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        time: &str,
    ) -> Result<bool, anyhow::Error> {
        let (found,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (
                 SELECT 1 FROM doctor_slots
                 WHERE doctor_id = $1 AND slot_date = $2 AND $3 = ANY(times)
             )",
        )
        .bind(doctor_id)
        .bind(date)
        .bind(time)
        .fetch_one(self.pool)
        .await
        .context("Failed to probe the slot ledger")?;
        Ok(found)
    }

    async fn is_doctor(&self, user_id: Uuid) -> Result<bool, anyhow::Error> {
        let role: Option<(String,)> = sqlx::query_as("SELECT role FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(self.pool)
            .await
            .context("Failed to query doctor account")?;
        Ok(matches!(role, Some((r,)) if r == Role::Doctor.as_str()))
    }
}
