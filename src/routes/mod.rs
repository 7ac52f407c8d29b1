mod appointments;
mod auth;
mod health_check;
mod users;

pub use appointments::*;
pub use auth::*;
pub use health_check::*;
pub use users::*;
