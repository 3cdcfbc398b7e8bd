mod auth;
mod health_check;

pub use auth::{
    bump_token_version, delete_account, get_current_identity, login, logout, refresh, register,
    revoke_all_sessions,
};
pub use health_check::health_check;
