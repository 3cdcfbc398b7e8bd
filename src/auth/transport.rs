/// Refresh token source resolution
///
/// The HTTP layer may receive the refresh token as an explicit request
/// argument, from the HTTP-only cookie, or both. The argument wins.

use crate::error::AuthError;

/// Pick the refresh token to use: argument first, then the cookie value
///
/// An argument that is present but empty is still the argument; it is
/// rejected later as malformed input rather than silently replaced.
pub fn resolve_refresh_token(
    argument: Option<String>,
    cookie: Option<String>,
) -> Result<String, AuthError> {
    argument.or(cookie).ok_or(AuthError::MissingRefreshToken)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argument_takes_precedence() {
        let resolved = resolve_refresh_token(Some("from-arg".into()), Some("from-cookie".into()));
        assert_eq!(resolved.unwrap(), "from-arg");
    }

    #[test]
    fn test_cookie_fallback() {
        let resolved = resolve_refresh_token(None, Some("from-cookie".into()));
        assert_eq!(resolved.unwrap(), "from-cookie");
    }

    #[test]
    fn test_empty_argument_is_not_replaced() {
        let resolved = resolve_refresh_token(Some(String::new()), Some("from-cookie".into()));
        assert_eq!(resolved.unwrap(), "");
    }

    #[test]
    fn test_missing_everywhere() {
        let err = resolve_refresh_token(None, None).unwrap_err();
        assert_eq!(err, AuthError::MissingRefreshToken);
        assert_eq!(
            err.to_string(),
            "Refresh token is required. Provide it as an argument or via HTTP-Only cookie."
        );
    }
}
