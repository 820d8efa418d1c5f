use std::path::PathBuf;
use thiserror::Error;

/// Main error type for lumen operations
#[derive(Error, Debug)]
pub enum LumenError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Not found: {0}")]
    NotFound(#[from] NotFoundError),

    #[error("External service unavailable: {0}")]
    External(#[from] ExternalUnavailable),

    #[error("Player backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("State persistence error: {0}")]
    State(#[from] StateError),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {path:?}")]
    FileRead { path: PathBuf, source: std::io::Error },

    #[error("Failed to parse TOML configuration: {message}")]
    TomlParse { message: String },

    #[error("Failed to parse {path:?}: {message}")]
    JsonParse { path: PathBuf, message: String },

    #[error("data_source has no \"Default\" entry")]
    MissingDefault,

    #[error("Playlist mode is active but no playlist is selected")]
    NoActivePlaylist,

    #[error("Active playlist '{name}' is not in the playlist store")]
    ActivePlaylistMissing { name: String },

    #[error("Configuration validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid configuration value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Could not determine config directory")]
    NoConfigDir,
}

/// User input that cannot be acted on
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Playlist name must not be empty")]
    EmptyPlaylistName,

    #[error("Nothing selected for {operation}")]
    EmptySelection { operation: String },

    #[error("File does not exist: {path:?}")]
    MissingFile { path: PathBuf },

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },
}

#[derive(Error, Debug)]
pub enum NotFoundError {
    #[error("Unknown playlist: {name}")]
    Playlist { name: String },

    #[error("Unknown monitor: {name}")]
    Monitor { name: String },

    #[error("Media directory not found: {path:?}")]
    MediaDirectory { path: PathBuf },

    #[error("No videos found in {path:?}")]
    NoVideos { path: PathBuf },
}

/// A collaborator outside this process could not be reached
#[derive(Error, Debug)]
pub enum ExternalUnavailable {
    #[error("lumen daemon is not reachable at {socket:?}")]
    DaemonUnreachable { socket: PathBuf },

    #[error("IPC exchange failed: {message}")]
    Ipc { message: String },

    #[error("Failed to access {url}: {message}")]
    Webpage { url: String, message: String },

    #[error("Failed to stream {url}: {message}")]
    Stream { url: String, message: String },

    #[error("Display query failed: {message}")]
    DisplayQuery { message: String },

    #[error("Required tool not found in PATH: {tool}")]
    ToolMissing { tool: String },
}

/// Errors confined to a single monitor's surface or player
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to allocate surface for {monitor}: {message}")]
    SurfaceAllocation { monitor: String, message: String },

    #[error("Failed to spawn {command}")]
    Spawn { command: String, source: std::io::Error },

    #[error("Player on {monitor} rejected command: {message}")]
    Control { monitor: String, message: String },
}

/// Playlist store persistence errors
#[derive(Error, Debug)]
pub enum StateError {
    #[error("Failed to read state file: {path:?}")]
    FileRead { path: PathBuf, source: std::io::Error },

    #[error("Failed to write state file: {path:?}")]
    FileWrite { path: PathBuf, source: std::io::Error },

    #[error("Failed to create state directory: {path:?}")]
    DirectoryCreation { path: PathBuf, source: std::io::Error },

    #[error("Failed to serialize state: {message}")]
    Serialization { message: String },
}

// Convenience type alias
pub type Result<T> = std::result::Result<T, LumenError>;

impl From<toml::de::Error> for LumenError {
    fn from(err: toml::de::Error) -> Self {
        LumenError::Config(ConfigError::TomlParse {
            message: err.to_string(),
        })
    }
}

impl From<toml::ser::Error> for LumenError {
    fn from(err: toml::ser::Error) -> Self {
        LumenError::State(StateError::Serialization {
            message: err.to_string(),
        })
    }
}

impl LumenError {
    /// Whether the process keeps serving with degraded functionality
    /// rather than aborting the current operation outright.
    pub fn is_degraded_mode(&self) -> bool {
        matches!(self, LumenError::External(_) | LumenError::Backend(_))
    }
}

// Error reporting utilities
pub trait ErrorReporting {
    fn log_error(&self, context: &str);
    fn user_friendly_message(&self) -> String;
}

impl ErrorReporting for LumenError {
    fn log_error(&self, context: &str) {
        if self.is_degraded_mode() {
            log::warn!("{}: {:?}", context, self);
        } else {
            log::error!("{}: {:?}", context, self);
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            LumenError::Config(ConfigError::FileRead { path, .. }) => {
                format!("Configuration file not readable: {:?}", path)
            }
            LumenError::Config(ConfigError::TomlParse { message }) => {
                format!("Invalid configuration format: {}", message)
            }
            LumenError::Config(ConfigError::MissingDefault) => {
                "Configuration is corrupt: data_source needs a \"Default\" entry".to_string()
            }
            LumenError::External(ExternalUnavailable::DaemonUnreachable { .. }) => {
                "lumen daemon is not running. Please start lumen-daemon first.".to_string()
            }
            LumenError::External(ExternalUnavailable::ToolMissing { tool }) => {
                format!("{} is not installed or not in PATH", tool)
            }
            LumenError::NotFound(NotFoundError::NoVideos { path }) => {
                format!("No videos found in {:?}. Put some videos there first.", path)
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_error_user_friendly_message() {
        let error = ConfigError::FileRead {
            path: PathBuf::from("/nonexistent/config.toml"),
            source: io::Error::new(io::ErrorKind::NotFound, "File not found"),
        };
        let lumen_error = LumenError::Config(error);

        let message = lumen_error.user_friendly_message();
        assert!(message.contains("Configuration file not readable"));
        assert!(message.contains("/nonexistent/config.toml"));
    }

    #[test]
    fn test_missing_default_message() {
        let message = LumenError::from(ConfigError::MissingDefault).user_friendly_message();
        assert!(message.contains("Default"));
    }

    #[test]
    fn test_unreachable_daemon_is_degraded_not_fatal() {
        let error = LumenError::from(ExternalUnavailable::DaemonUnreachable {
            socket: PathBuf::from("/run/user/1000/lumen.sock"),
        });
        assert!(error.is_degraded_mode());
        assert!(error.user_friendly_message().contains("not running"));
    }

    #[test]
    fn test_validation_error_is_not_degraded() {
        let error = LumenError::from(ValidationError::EmptyPlaylistName);
        assert!(!error.is_degraded_mode());
        assert_eq!(
            error.to_string(),
            "Validation error: Playlist name must not be empty"
        );
    }

    #[test]
    fn test_toml_error_conversion() {
        let parse_error = toml::from_str::<toml::Value>("mode = ").unwrap_err();
        let lumen_error: LumenError = parse_error.into();

        match lumen_error {
            LumenError::Config(ConfigError::TomlParse { .. }) => {}
            _ => panic!("Expected ConfigError::TomlParse"),
        }
    }
}
