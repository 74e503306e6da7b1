//! Environment, connection and pool configuration
//!
//! Connect strings use the classic `user/password@database` form:
//! - `scott/tiger@db11g`
//! - `scott/tiger` (default database)
//! - `/@db11g` (external / OS authentication)

use std::fmt;
use std::ops::BitOr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::{DEFAULT_EVENT_QUEUE_CAPACITY, DEFAULT_STMT_CACHE_SIZE};
use crate::error::{Error, Result};

/// Environment mode flags
///
/// Flags combine with `|`:
///
/// ```rust
/// use ocibind::EnvMode;
///
/// let mode = EnvMode::THREADED | EnvMode::EVENTS;
/// assert!(mode.contains(EnvMode::EVENTS));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EnvMode(u32);

impl EnvMode {
    /// Default mode: single threaded, no notifications
    pub const DEFAULT: EnvMode = EnvMode(0);
    /// Enable application-level threading primitives
    pub const THREADED: EnvMode = EnvMode(1);
    /// Enable subscriptions, HA and AQ notifications
    pub const EVENTS: EnvMode = EnvMode(4);

    /// Raw flag bits
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Check whether all flags in `other` are set
    pub fn contains(self, other: EnvMode) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for EnvMode {
    type Output = EnvMode;

    fn bitor(self, rhs: EnvMode) -> EnvMode {
        EnvMode(self.0 | rhs.0)
    }
}

/// Privilege mode of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    /// Regular session
    #[default]
    Default,
    /// Authenticated for SYSDBA access
    SysDba,
    /// Authenticated for SYSOPER access
    SysOper,
}

/// Configuration for [`Environment::initialize`](crate::Environment::initialize).
///
/// # Example
///
/// ```rust
/// use ocibind::{EnvMode, EnvironmentConfig};
///
/// let config = EnvironmentConfig::new()
///     .mode(EnvMode::THREADED | EnvMode::EVENTS)
///     .warnings(true)
///     .event_queue_capacity(128);
/// assert!(config.warnings);
/// ```
#[derive(Debug, Clone)]
pub struct EnvironmentConfig {
    /// Mode flags
    pub mode: EnvMode,
    /// Location of the native client library, passed through to the native layer
    pub lib_path: Option<PathBuf>,
    /// Whether native warnings are raised as errors
    pub warnings: bool,
    /// Capacity of the bounded notification queue
    pub event_queue_capacity: usize,
}

impl EnvironmentConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the mode flags
    pub fn mode(mut self, mode: EnvMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the native library location
    pub fn lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.lib_path = Some(path.into());
        self
    }

    /// Raise native warnings as errors
    pub fn warnings(mut self, enabled: bool) -> Self {
        self.warnings = enabled;
        self
    }

    /// Set the notification queue capacity (minimum 1)
    pub fn event_queue_capacity(mut self, capacity: usize) -> Self {
        self.event_queue_capacity = capacity.max(1);
        self
    }
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            mode: EnvMode::DEFAULT,
            lib_path: None,
            warnings: false,
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
        }
    }
}

/// Connection descriptor: database, credentials and session mode
///
/// Empty user and password request external (OS) authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectParams {
    /// Database / service name
    pub database: String,
    /// User name
    pub user: String,
    password: String,
    /// Session privilege mode
    pub mode: SessionMode,
}

impl ConnectParams {
    /// Create connection parameters with credentials
    pub fn new(
        database: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            database: database.into(),
            user: user.into(),
            password: password.into(),
            mode: SessionMode::Default,
        }
    }

    /// Create connection parameters for an externally authenticated session
    pub fn external(database: impl Into<String>) -> Self {
        Self::new(database, "", "")
    }

    /// Set the session mode
    pub fn with_mode(mut self, mode: SessionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Check whether the session is externally authenticated
    pub fn is_external(&self) -> bool {
        self.user.is_empty() && self.password.is_empty()
    }

    pub(crate) fn password(&self) -> &str {
        &self.password
    }

    /// Set the password
    pub fn set_password(&mut self, password: impl Into<String>) {
        self.password = password.into();
    }
}

impl fmt::Debug for ConnectParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectParams")
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .field("mode", &self.mode)
            .finish()
    }
}

/// Parse a `user/password@database` connect string
impl FromStr for ConnectParams {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidConnectString(
                "empty connect string".to_string(),
            ));
        }

        let (credentials, database) = match s.rfind('@') {
            Some(at) => (&s[..at], &s[at + 1..]),
            None => (s, ""),
        };

        if s.contains('@') && database.is_empty() {
            return Err(Error::InvalidConnectString(
                "missing database after @".to_string(),
            ));
        }

        let (user, password) = match credentials.find('/') {
            Some(slash) => (&credentials[..slash], &credentials[slash + 1..]),
            None => (credentials, ""),
        };

        if user.is_empty() && !password.is_empty() {
            return Err(Error::InvalidConnectString(
                "password given without user".to_string(),
            ));
        }

        Ok(ConnectParams::new(database, user, password))
    }
}

impl fmt::Display for ConnectParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_external() {
            write!(f, "/@{}", self.database)
        } else {
            write!(f, "{}@{}", self.user, self.database)
        }
    }
}

/// Session pool configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Sessions opened when the pool is created
    pub min: u32,
    /// Upper bound of open sessions
    pub max: u32,
    /// Sessions opened each time the pool grows
    pub increment: u32,
    /// Statement cache size of pooled sessions
    pub stmt_cache_size: u32,
    /// Idle timeout after which sessions are closed
    pub timeout: Duration,
    /// Fail instead of waiting when the pool is exhausted
    pub no_wait: bool,
}

impl PoolConfig {
    /// Create a pool configuration with the given bounds
    pub fn new(min: u32, max: u32, increment: u32) -> Self {
        Self {
            min,
            max,
            increment,
            ..Self::default()
        }
    }

    /// Set the idle timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fail immediately when no session is available
    pub fn no_wait(mut self, no_wait: bool) -> Self {
        self.no_wait = no_wait;
        self
    }

    /// Set the statement cache size of pooled sessions
    pub fn stmt_cache_size(mut self, size: u32) -> Self {
        self.stmt_cache_size = size;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.max == 0 || self.min > self.max {
            return Err(Error::InvalidArgument(format!(
                "invalid pool bounds: min={} max={}",
                self.min, self.max
            )));
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min: 1,
            max: 10,
            increment: 1,
            stmt_cache_size: DEFAULT_STMT_CACHE_SIZE,
            timeout: Duration::from_secs(0),
            no_wait: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_connect_string() {
        let params: ConnectParams = "scott/tiger@db11g".parse().unwrap();
        assert_eq!(params.user, "scott");
        assert_eq!(params.password(), "tiger");
        assert_eq!(params.database, "db11g");
        assert!(!params.is_external());
    }

    #[test]
    fn test_parse_without_database() {
        let params: ConnectParams = "scott/tiger".parse().unwrap();
        assert_eq!(params.user, "scott");
        assert_eq!(params.database, "");
    }

    #[test]
    fn test_parse_external() {
        let params: ConnectParams = "/@db11g".parse().unwrap();
        assert!(params.is_external());
        assert_eq!(params.database, "db11g");
        assert_eq!(params.to_string(), "/@db11g");
    }

    #[test]
    fn test_parse_password_with_at_sign() {
        let params: ConnectParams = "scott/p@ss@db".parse().unwrap();
        assert_eq!(params.password(), "p@ss");
        assert_eq!(params.database, "db");
    }

    #[test]
    fn test_parse_errors() {
        assert!("".parse::<ConnectParams>().is_err());
        assert!("scott/tiger@".parse::<ConnectParams>().is_err());
        assert!("/tiger@db".parse::<ConnectParams>().is_err());
    }

    #[test]
    fn test_display_hides_password() {
        let params = ConnectParams::new("db", "scott", "tiger");
        assert_eq!(params.to_string(), "scott@db");
        assert!(!format!("{:?}", params).contains("tiger"));
    }

    #[test]
    fn test_env_mode_flags() {
        let mode = EnvMode::THREADED | EnvMode::EVENTS;
        assert!(mode.contains(EnvMode::THREADED));
        assert!(mode.contains(EnvMode::EVENTS));
        assert!(!EnvMode::DEFAULT.contains(EnvMode::THREADED));
        assert_eq!(mode.bits(), 5);
    }

    #[test]
    fn test_pool_config_validation() {
        assert!(PoolConfig::new(1, 4, 1).validate().is_ok());
        assert!(PoolConfig::new(5, 4, 1).validate().is_err());
        assert!(PoolConfig::new(0, 0, 1).validate().is_err());
    }

    #[test]
    fn test_environment_config_builder() {
        let config = EnvironmentConfig::new()
            .mode(EnvMode::EVENTS)
            .lib_path("/opt/oracle/lib")
            .event_queue_capacity(0);
        assert_eq!(config.mode, EnvMode::EVENTS);
        assert_eq!(config.event_queue_capacity, 1);
        assert!(config.lib_path.is_some());
    }
}
