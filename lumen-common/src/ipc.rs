use std::fmt;
use std::path::{Path, PathBuf};
use std::os::unix::net::{UnixListener, UnixStream};
use std::io::{Read, Write};
use std::time::Duration;
use serde::{Serialize, Deserialize};
use anyhow::{Result, Context};
use crate::binding::{GlobalPlaybackState, MonitorStatus};
use crate::error::{ExternalUnavailable, LumenError, ValidationError};
use crate::Mode;

/// Runtime knobs readable and writable over IPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Property {
    Volume,
    IsMute,
    BlurRadius,
    IsStaticWallpaper,
    IsPauseWhenMaximized,
    IsMuteWhenMaximized,
    IsPausedByUser,
}

impl Property {
    pub const ALL: [Property; 7] = [
        Property::Volume,
        Property::IsMute,
        Property::BlurRadius,
        Property::IsStaticWallpaper,
        Property::IsPauseWhenMaximized,
        Property::IsMuteWhenMaximized,
        Property::IsPausedByUser,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Property::Volume => "volume",
            Property::IsMute => "is_mute",
            Property::BlurRadius => "blur_radius",
            Property::IsStaticWallpaper => "is_static_wallpaper",
            Property::IsPauseWhenMaximized => "is_pause_when_maximized",
            Property::IsMuteWhenMaximized => "is_mute_when_maximized",
            Property::IsPausedByUser => "is_paused_by_user",
        }
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Property {
    type Err = LumenError;

    fn from_str(s: &str) -> crate::Result<Self> {
        let wanted = s.trim().replace('-', "_");
        Property::ALL
            .into_iter()
            .find(|property| property.name() == wanted)
            .ok_or_else(|| {
                ValidationError::InvalidValue {
                    field: "property".to_string(),
                    value: s.to_string(),
                }
                .into()
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyValue {
    Volume(u8),
    IsMute(bool),
    BlurRadius(u32),
    IsStaticWallpaper(bool),
    IsPauseWhenMaximized(bool),
    IsMuteWhenMaximized(bool),
    IsPausedByUser(bool),
}

impl PropertyValue {
    pub fn property(&self) -> Property {
        match self {
            PropertyValue::Volume(_) => Property::Volume,
            PropertyValue::IsMute(_) => Property::IsMute,
            PropertyValue::BlurRadius(_) => Property::BlurRadius,
            PropertyValue::IsStaticWallpaper(_) => Property::IsStaticWallpaper,
            PropertyValue::IsPauseWhenMaximized(_) => Property::IsPauseWhenMaximized,
            PropertyValue::IsMuteWhenMaximized(_) => Property::IsMuteWhenMaximized,
            PropertyValue::IsPausedByUser(_) => Property::IsPausedByUser,
        }
    }

    /// Parses a command-line value for `property`. Volume is capped at 100.
    pub fn parse(property: Property, raw: &str) -> crate::Result<Self> {
        let invalid = || -> LumenError {
            ValidationError::InvalidValue {
                field: property.name().to_string(),
                value: raw.to_string(),
            }
            .into()
        };
        let raw_trimmed = raw.trim();
        let parse_bool = || -> crate::Result<bool> {
            match raw_trimmed.to_lowercase().as_str() {
                "true" | "on" | "yes" | "1" => Ok(true),
                "false" | "off" | "no" | "0" => Ok(false),
                _ => Err(invalid()),
            }
        };

        Ok(match property {
            Property::Volume => {
                let volume: u8 = raw_trimmed.parse().map_err(|_| invalid())?;
                if volume > 100 {
                    return Err(invalid());
                }
                PropertyValue::Volume(volume)
            }
            Property::BlurRadius => PropertyValue::BlurRadius(raw_trimmed.parse().map_err(|_| invalid())?),
            Property::IsMute => PropertyValue::IsMute(parse_bool()?),
            Property::IsStaticWallpaper => PropertyValue::IsStaticWallpaper(parse_bool()?),
            Property::IsPauseWhenMaximized => PropertyValue::IsPauseWhenMaximized(parse_bool()?),
            Property::IsMuteWhenMaximized => PropertyValue::IsMuteWhenMaximized(parse_bool()?),
            Property::IsPausedByUser => PropertyValue::IsPausedByUser(parse_bool()?),
        })
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Volume(v) => write!(f, "{}", v),
            PropertyValue::BlurRadius(v) => write!(f, "{}", v),
            PropertyValue::IsMute(v)
            | PropertyValue::IsStaticWallpaper(v)
            | PropertyValue::IsPauseWhenMaximized(v)
            | PropertyValue::IsMuteWhenMaximized(v)
            | PropertyValue::IsPausedByUser(v) => write!(f, "{}", v),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpcCommand {
    PausePlayback,
    StartPlayback,
    Quit,
    FeelingLucky,
    Get { property: Property },
    Set { value: PropertyValue },
    /// `monitor` of `None` targets `Default` only, `"all"` every known monitor.
    Video { path: String, monitor: Option<String> },
    Webpage { url: String },
    Stream { url: String },
    Playlist { name: String },
    WindowMaximized { maximized: bool },
    Reload,
    Status,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpcResponse {
    Success { message: String },
    Error { message: String },
    Property { value: PropertyValue },
    Status {
        mode: Mode,
        active_playlist: Option<String>,
        paused: bool,
        playback: GlobalPlaybackState,
        monitors: Vec<MonitorStatus>,
    },
}

/// `$XDG_RUNTIME_DIR/lumen.sock`, or `/tmp/lumen.sock` without a runtime dir.
pub fn default_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("lumen.sock")
}

pub struct IpcClient {
    socket_path: PathBuf,
    timeout: Option<Duration>,
}

impl IpcClient {
    pub fn new() -> Self {
        Self::with_socket(default_socket_path())
    }

    pub fn with_socket(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: None,
        }
    }

    /// Bounds how long to wait for the daemon's reply.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn send_command(&self, command: IpcCommand) -> Result<IpcResponse> {
        let mut stream = UnixStream::connect(&self.socket_path).map_err(|e| {
            log::debug!("Connecting to {:?} failed: {}", self.socket_path, e);
            LumenError::External(ExternalUnavailable::DaemonUnreachable {
                socket: self.socket_path.clone(),
            })
        })?;
        stream.set_read_timeout(self.timeout)
            .with_context(|| "Failed to set read timeout")?;

        let command_json = serde_json::to_string(&command)
            .with_context(|| "Failed to serialize command")?;

        stream.write_all(command_json.as_bytes())
            .with_context(|| "Failed to send command to daemon")?;
        stream.shutdown(std::net::Shutdown::Write)
            .with_context(|| "Failed to shutdown write stream")?;

        let mut response = String::new();
        stream.read_to_string(&mut response)
            .with_context(|| "Failed to read response from daemon")?;

        let ipc_response: IpcResponse = serde_json::from_str(&response)
            .with_context(|| "Failed to deserialize response")?;

        Ok(ipc_response)
    }
}

impl Default for IpcClient {
    fn default() -> Self {
        Self::new()
    }
}

pub struct IpcServer {
    socket_path: PathBuf,
}

impl IpcServer {
    pub fn new() -> Self {
        Self::with_socket(default_socket_path())
    }

    pub fn with_socket(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Binds the socket, replacing a stale one left by a crashed daemon.
    pub fn bind(&self) -> Result<UnixListener> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)
                .with_context(|| "Failed to remove existing socket")?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| "Failed to create socket directory")?;
        }

        let listener = UnixListener::bind(&self.socket_path)
            .with_context(|| format!("Failed to bind to socket {:?}", self.socket_path))?;

        log::info!("IPC server listening on {:?}", self.socket_path);
        Ok(listener)
    }

    pub fn start<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(IpcCommand) -> Result<IpcResponse> + Send + Clone + 'static,
    {
        let listener = self.bind()?;
        Self::serve(listener, handler);
        Ok(())
    }

    /// Accept loop; each connection gets its own thread.
    pub fn serve<F>(listener: UnixListener, handler: F)
    where
        F: Fn(IpcCommand) -> Result<IpcResponse> + Send + Clone + 'static,
    {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let handler = handler.clone();
                    std::thread::spawn(move || {
                        if let Err(e) = Self::handle_connection(stream, &handler) {
                            log::error!("Error handling IPC connection: {}", e);
                        }
                    });
                }
                Err(e) => {
                    log::error!("Error accepting IPC connection: {}", e);
                }
            }
        }
    }

    fn handle_connection<F>(mut stream: UnixStream, handler: &F) -> Result<()>
    where
        F: Fn(IpcCommand) -> Result<IpcResponse>,
    {
        let mut command_json = String::new();
        stream.read_to_string(&mut command_json)
            .with_context(|| "Failed to read command from client")?;

        let response = match serde_json::from_str::<IpcCommand>(&command_json) {
            Ok(command) => {
                log::debug!("IPC command: {:?}", command);
                handler(command).unwrap_or_else(|e| IpcResponse::Error { message: e.to_string() })
            }
            Err(e) => IpcResponse::Error {
                message: format!("Malformed command: {}", e),
            },
        };

        let response_json = serde_json::to_string(&response)
            .with_context(|| "Failed to serialize response")?;

        stream.write_all(response_json.as_bytes())
            .with_context(|| "Failed to send response to client")?;

        Ok(())
    }
}

impl Default for IpcServer {
    fn default() -> Self {
        Self::new()
    }
}
