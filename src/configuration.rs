use crate::error::ConfigError;

#[derive(serde::Deserialize, Clone)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub application: ApplicationSettings,
    pub jwt: JwtSettings,
    #[serde(default)]
    pub lockout: LockoutSettings,
    #[serde(default)]
    pub cookie: CookieSettings,
    #[serde(default)]
    pub store: StoreSettings,
}

impl Settings {
    /// Reject settings that would make the token lifecycle unsafe
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.jwt.validate()?;
        if self.lockout.threshold < 1 {
            return Err(ConfigError::InvalidValue(
                "lockout.threshold must be at least 1".to_string(),
            ));
        }
        if self.store.timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "store.timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(serde::Deserialize, Clone)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
}

#[derive(serde::Deserialize, Clone)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub port: u16,
    pub host: String,
    pub database_name: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl DatabaseSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database_name
        )
    }

    pub fn connection_string_without_db(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}",
            self.username, self.password, self.host, self.port
        )
    }
}

/// Refresh tokens live for seven days unless configured otherwise
pub const DEFAULT_REFRESH_TOKEN_EXPIRY_SECONDS: i64 = 7 * 24 * 60 * 60;

const MIN_JWT_SECRET_LENGTH: usize = 32;

/// JWT authentication settings
#[derive(serde::Deserialize, Clone)]
pub struct JwtSettings {
    pub secret: String,
    #[serde(default = "default_access_token_expiry")]
    pub access_token_expiry: i64,   // seconds (e.g., 900 for 15 minutes)
    #[serde(default = "default_refresh_token_expiry")]
    pub refresh_token_expiry: i64,  // seconds (e.g., 604800 for 7 days)
    pub issuer: String,
}

fn default_access_token_expiry() -> i64 {
    15 * 60
}

fn default_refresh_token_expiry() -> i64 {
    DEFAULT_REFRESH_TOKEN_EXPIRY_SECONDS
}

impl JwtSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret.len() < MIN_JWT_SECRET_LENGTH {
            return Err(ConfigError::InvalidValue(format!(
                "jwt.secret must be at least {} characters",
                MIN_JWT_SECRET_LENGTH
            )));
        }
        if self.issuer.trim().is_empty() {
            return Err(ConfigError::MissingRequired("jwt.issuer".to_string()));
        }
        if self.access_token_expiry <= 0 || self.refresh_token_expiry <= 0 {
            return Err(ConfigError::InvalidValue(
                "token lifetimes must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Failed sign-in lockout policy
#[derive(serde::Deserialize, Clone, Debug)]
pub struct LockoutSettings {
    pub threshold: i32,
    pub duration_seconds: i64,
}

impl Default for LockoutSettings {
    fn default() -> Self {
        Self {
            threshold: 5,
            duration_seconds: 15 * 60,
        }
    }
}

/// Names and flags for the HTTP-only auth cookies
#[derive(serde::Deserialize, Clone, Debug)]
#[serde(default)]
pub struct CookieSettings {
    pub refresh_token_name: String,
    pub access_token_name: String,
    pub secure: bool,
    pub domain: Option<String>,
    pub path: String,
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            refresh_token_name: "refresh_token".to_string(),
            access_token_name: "access_token".to_string(),
            secure: true,
            domain: None,
            path: "/".to_string(),
        }
    }
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct StoreSettings {
    pub timeout_ms: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self { timeout_ms: 5000 }
    }
}

impl StoreSettings {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }
}

/// Load settings from `configuration.yaml` (optional) and `APP__*` environment variables
pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(config::Environment::with_prefix("APP").separator("__"))
        .build()?;
    settings.try_deserialize::<Settings>()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt_settings() -> JwtSettings {
        JwtSettings {
            secret: "test-secret-key-at-least-32-characters-long".to_string(),
            access_token_expiry: 900,
            refresh_token_expiry: DEFAULT_REFRESH_TOKEN_EXPIRY_SECONDS,
            issuer: "test".to_string(),
        }
    }

    #[test]
    fn test_default_refresh_lifetime_is_seven_days() {
        assert_eq!(DEFAULT_REFRESH_TOKEN_EXPIRY_SECONDS, 604800);
    }

    #[test]
    fn test_short_secret_rejected() {
        let mut settings = jwt_settings();
        settings.secret = "too-short".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_valid_jwt_settings() {
        assert!(jwt_settings().validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let lockout = LockoutSettings::default();
        assert_eq!(lockout.threshold, 5);
        assert_eq!(lockout.duration_seconds, 900);

        let cookie = CookieSettings::default();
        assert_eq!(cookie.refresh_token_name, "refresh_token");
        assert!(cookie.secure);
    }
}
