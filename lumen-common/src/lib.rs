pub mod content;
pub mod monitor;
pub mod resolver;
pub mod playlist;
pub mod binding;
pub mod media_discovery;
pub mod ipc;
pub mod error;

pub use content::{ContentRef, SourceBinding, DEFAULT_SOURCE_KEY};
pub use monitor::{diff, DisplayProvider, Geometry, Monitor, MonitorDiff, MonitorRegistry, StaticProvider};
pub use resolver::{resolve, SourceContext};
pub use playlist::{AddOutcome, Direction, Playlist, PlaylistEntries, PlaylistStore};
pub use binding::{
    BackendFactory, BackendKind, BindState, GlobalPlaybackState, MonitorStatus, PauseState,
    PlaybackBinding, PlayerBackend,
};
pub use media_discovery::MediaDiscovery;
pub use ipc::{IpcClient, IpcServer, IpcCommand, IpcResponse, Property, PropertyValue};
pub use error::{LumenError, Result, ErrorReporting};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Video,    // Local video file per monitor
    Webpage,  // Web URL or local HTML, Default source only
    Stream,   // Live stream URL, Default source only
    Playlist, // Active playlist's per-monitor list
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Video
    }
}

impl Mode {
    /// Player kind a monitor needs to render this mode.
    pub fn backend_kind(self) -> BackendKind {
        match self {
            Mode::Video | Mode::Playlist => BackendKind::Video,
            Mode::Stream => BackendKind::Stream,
            Mode::Webpage => BackendKind::Web,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Mode::Video => "video",
            Mode::Webpage => "webpage",
            Mode::Stream => "stream",
            Mode::Playlist => "playlist",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Mode {
    type Err = LumenError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "video" => Ok(Mode::Video),
            "webpage" => Ok(Mode::Webpage),
            "stream" => Ok(Mode::Stream),
            "playlist" => Ok(Mode::Playlist),
            _ => Err(error::ConfigError::InvalidValue {
                field: "mode".to_string(),
                value: s.to_string(),
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("video".parse::<Mode>().unwrap(), Mode::Video);
        assert_eq!(" Playlist ".parse::<Mode>().unwrap(), Mode::Playlist);
        assert!("slideshow".parse::<Mode>().is_err());
    }

    #[test]
    fn test_playlist_mode_plays_through_video_backend() {
        assert_eq!(Mode::Playlist.backend_kind(), BackendKind::Video);
        assert_eq!(Mode::Webpage.backend_kind(), BackendKind::Web);
        assert_eq!(Mode::Stream.backend_kind(), BackendKind::Stream);
    }
}
