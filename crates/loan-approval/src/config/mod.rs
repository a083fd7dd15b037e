use crate::artifact::REQUIRED_RUNTIME_VERSION;
use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub models: ModelConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let log_format = match env::var("APP_LOG_FORMAT") {
            Ok(value) => LogFormat::parse(&value)?,
            Err(_) => LogFormat::Compact,
        };

        let base_dir = match env::var("APP_BASE_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => executable_dir()?,
        };
        let artifact_dir =
            PathBuf::from(env::var("APP_MODEL_DIR").unwrap_or_else(|_| "ml_models".to_string()));
        let required_runtime_version = env::var("APP_MODEL_RUNTIME_VERSION")
            .unwrap_or_else(|_| REQUIRED_RUNTIME_VERSION.to_string());
        if required_runtime_version.trim().is_empty() {
            return Err(ConfigError::EmptyRuntimeVersion);
        }

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig {
                log_level,
                format: log_format,
            },
            models: ModelConfig {
                base_dir,
                artifact_dir,
                required_runtime_version,
            },
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Log output layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Full,
}

impl LogFormat {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "full" => Ok(Self::Full),
            _ => Err(ConfigError::InvalidLogFormat(value.to_string())),
        }
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub format: LogFormat,
}

/// Where the classifier artifacts live and which runtime version they require.
/// Directory holding the running binary; artifacts ship beside it.
fn executable_dir() -> Result<PathBuf, ConfigError> {
    let exe = env::current_exe().map_err(ConfigError::BaseDir)?;
    exe.parent().map(PathBuf::from).ok_or_else(|| {
        ConfigError::BaseDir(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "executable path has no parent directory",
        ))
    })
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub base_dir: PathBuf,
    pub artifact_dir: PathBuf,
    pub required_runtime_version: String,
}

impl ModelConfig {
    /// Artifact directory, resolved against the base directory when relative.
    pub fn resolved_artifact_dir(&self) -> PathBuf {
        if self.artifact_dir.is_absolute() {
            self.artifact_dir.clone()
        } else {
            self.base_dir.join(&self.artifact_dir)
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidLogFormat(String),
    BaseDir(std::io::Error),
    EmptyRuntimeVersion,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidLogFormat(value) => {
                write!(f, "APP_LOG_FORMAT must be 'compact' or 'full', got '{value}'")
            }
            ConfigError::BaseDir(_) => {
                write!(f, "APP_BASE_DIR is unset and the executable directory is unavailable")
            }
            ConfigError::EmptyRuntimeVersion => {
                write!(f, "APP_MODEL_RUNTIME_VERSION must not be empty")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::BaseDir(source) => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidLogFormat(_)
            | ConfigError::EmptyRuntimeVersion => None,
        }
    }
}
