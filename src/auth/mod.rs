/// Authentication module
///
/// Credential verification, access token issuance and verification,
/// refresh token storage and rotation, and session invalidation.

mod authenticator;
mod claims;
mod credentials;
mod invalidation;
mod jwt;
mod password;
mod refresh_token;
mod rotation;
mod transport;

pub use authenticator::Authenticator;
pub use claims::{AuthenticatedIdentity, Claims};
pub use credentials::verify_credentials;
pub use invalidation::{
    bump_token_version, detect_reuse, invalidate_all, on_identity_deleted, revoke_refresh_token,
};
pub use jwt::{decode_access_token, generate_access_token, verify_access_token};
pub use password::{hash_password, verify_password};
pub use refresh_token::{
    generate_refresh_token, hash_token, issue_refresh_token, lookup_active_refresh_token,
};
pub use rotation::{rotate_refresh_token, TokenPair};
pub use transport::resolve_refresh_token;
