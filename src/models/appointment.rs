use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::user::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Rejected,
    Canceled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Rejected => "rejected",
            AppointmentStatus::Canceled => "canceled",
        }
    }

    /// A live appointment occupies its slot; terminal ones do not.
    pub fn is_live(&self) -> bool {
        matches!(self, AppointmentStatus::Pending | AppointmentStatus::Confirmed)
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("`{0}` is not a valid appointment status")]
pub struct ParseStatusError(String);

impl std::str::FromStr for AppointmentStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AppointmentStatus::Pending),
            "confirmed" => Ok(AppointmentStatus::Confirmed),
            "rejected" => Ok(AppointmentStatus::Rejected),
            "canceled" => Ok(AppointmentStatus::Canceled),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

impl TryFrom<String> for AppointmentStatus {
    type Error = ParseStatusError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub time: String,
    #[sqlx(try_from = "String")]
    pub status: AppointmentStatus,
    pub reason: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Appointment joined with the patient's and doctor's directory fields.
#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentDetail {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub time: String,
    #[sqlx(try_from = "String")]
    pub status: AppointmentStatus,
    pub reason: String,
    pub notes: Option<String>,
    pub patient_name: String,
    pub patient_email: String,
    pub doctor_name: String,
    pub doctor_specialization: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Who is acting on an appointment, relative to that appointment.
#[derive(Debug, Clone, Copy)]
pub struct Actor {
    pub role: Role,
    pub is_owner: bool,
    pub is_assigned_doctor: bool,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("actor is not allowed to perform this transition")]
    Forbidden,
    #[error("appointment is already {current}")]
    Invalid { current: AppointmentStatus },
}

/// Decides whether `actor` may move an appointment from `from` to `to`.
///
/// Confirm/reject belong to the assigned doctor and only apply to pending
/// appointments. Cancellation belongs to the owning patient, the assigned
/// doctor, or an admin, and only applies to live appointments. Nothing else
/// is a legal transition.
pub fn check_transition(
    actor: Actor,
    from: AppointmentStatus,
    to: AppointmentStatus,
) -> Result<(), TransitionError> {
    match to {
        AppointmentStatus::Confirmed | AppointmentStatus::Rejected => {
            if actor.role != Role::Doctor || !actor.is_assigned_doctor {
                return Err(TransitionError::Forbidden);
            }
            if from != AppointmentStatus::Pending {
                return Err(TransitionError::Invalid { current: from });
            }
            Ok(())
        }
        AppointmentStatus::Canceled => {
            let allowed = actor.is_owner
                || actor.role == Role::Admin
                || (actor.role == Role::Doctor && actor.is_assigned_doctor);
            if !allowed {
                return Err(TransitionError::Forbidden);
            }
            if !from.is_live() {
                return Err(TransitionError::Invalid { current: from });
            }
            Ok(())
        }
        // Nothing ever moves back to pending.
        AppointmentStatus::Pending => Err(TransitionError::Forbidden),
    }
}
