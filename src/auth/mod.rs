mod context;
mod credentials;
mod token;

pub use context::{AuthContext, JwtSecret, TokenTtl};
pub use credentials::{compute_password_hash, validate_creds, AuthError, Credentials};
pub use token::{decode_token, issue_token, Claims};
