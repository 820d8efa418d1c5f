use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use lumen_common::{
    error::{ConfigError, StateError},
    GlobalPlaybackState, LumenError, MediaDiscovery, Mode, Result, SourceBinding,
};

/// A burst of changes is flushed at the latest after this many debounce periods.
const MAX_FLUSH_DELAY_FACTOR: u32 = 5;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub mode: Mode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_playlist: Option<String>,
    #[serde(default = "default_audio_volume")]
    pub audio_volume: u8,
    #[serde(default)]
    pub mute_audio: bool,
    #[serde(default)]
    pub static_wallpaper: bool,
    #[serde(default = "default_blur_radius")]
    pub blur_radius: u32,
    #[serde(default = "default_true")]
    pub pause_when_maximized: bool,
    #[serde(default)]
    pub mute_when_maximized: bool,
    #[serde(default = "default_true")]
    pub first_time: bool,
    // No serde default: a file without data_source is corrupt, not fresh
    pub data_source: SourceBinding,
    #[serde(default)]
    pub daemon: DaemonConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DaemonConfig {
    #[serde(default = "default_monitor_poll_interval", with = "humantime_serde")]
    pub monitor_poll_interval: Duration,
    #[serde(default = "default_save_debounce", with = "humantime_serde")]
    pub save_debounce: Duration,
    #[serde(default = "default_validation_timeout", with = "humantime_serde")]
    pub validation_timeout: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_dir: Option<PathBuf>,
    #[serde(default = "default_player_command")]
    pub player_command: String,
    #[serde(default = "default_web_command")]
    pub web_command: String,
    #[serde(default)]
    pub display_provider: ProviderKind,
}

/// How the daemon discovers displays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    #[default]
    Auto,
    Xrandr,
    WlrRandr,
}

// Default values
fn default_audio_volume() -> u8 {
    50
}

fn default_blur_radius() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

fn default_monitor_poll_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_save_debounce() -> Duration {
    Duration::from_secs(1)
}

fn default_validation_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_player_command() -> String {
    "mpv".to_string()
}

fn default_web_command() -> String {
    "lumen-webview".to_string()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            monitor_poll_interval: default_monitor_poll_interval(),
            save_debounce: default_save_debounce(),
            validation_timeout: default_validation_timeout(),
            video_dir: None,
            player_command: default_player_command(),
            web_command: default_web_command(),
            display_provider: ProviderKind::default(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            active_playlist: None,
            audio_volume: default_audio_volume(),
            mute_audio: false,
            static_wallpaper: false,
            blur_radius: default_blur_radius(),
            pause_when_maximized: true,
            mute_when_maximized: false,
            first_time: true,
            data_source: SourceBinding::default(),
            daemon: DaemonConfig::default(),
        }
    }
}

impl Config {
    /// `$XDG_CONFIG_HOME/lumen/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or(LumenError::Config(ConfigError::NoConfigDir))?
            .join("lumen");

        Ok(config_dir.join("config.toml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| LumenError::Config(ConfigError::FileRead {
                path: path.to_path_buf(),
                source: e,
            }))?;

        let config: Config = toml::from_str(&content)?;
        config.validate()?;

        log::debug!("Loaded configuration from {:?} (mode {})", path, config.mode);
        Ok(config)
    }

    /// Writes through a temporary file so readers never see a half-written config.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| LumenError::State(StateError::DirectoryCreation {
                    path: parent.to_path_buf(),
                    source: e,
                }))?;
        }

        let content = toml::to_string_pretty(self)?;
        let tmp_path = path.with_extension("toml.tmp");

        std::fs::write(&tmp_path, content)
            .map_err(|e| LumenError::State(StateError::FileWrite {
                path: tmp_path.clone(),
                source: e,
            }))?;
        std::fs::rename(&tmp_path, path)
            .map_err(|e| LumenError::State(StateError::FileWrite {
                path: path.to_path_buf(),
                source: e,
            }))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.data_source.validate()?;

        if self.audio_volume > 100 {
            return Err(LumenError::Config(ConfigError::InvalidValue {
                field: "audio_volume".to_string(),
                value: self.audio_volume.to_string(),
            }));
        }

        if self.daemon.monitor_poll_interval < Duration::from_millis(100) {
            return Err(LumenError::Config(ConfigError::InvalidValue {
                field: "daemon.monitor_poll_interval".to_string(),
                value: humantime::format_duration(self.daemon.monitor_poll_interval).to_string(),
            }));
        }

        if self.daemon.validation_timeout.is_zero() {
            return Err(LumenError::Config(ConfigError::InvalidValue {
                field: "daemon.validation_timeout".to_string(),
                value: humantime::format_duration(self.daemon.validation_timeout).to_string(),
            }));
        }

        for (field, command) in [
            ("daemon.player_command", &self.daemon.player_command),
            ("daemon.web_command", &self.daemon.web_command),
        ] {
            if command.trim().is_empty() {
                return Err(LumenError::Config(ConfigError::Validation {
                    message: format!("{} must not be empty", field),
                }));
            }
        }

        if self.mode == Mode::Playlist && self.active_playlist.is_none() {
            log::warn!("Playlist mode without an active playlist, monitors will report an error");
        }

        Ok(())
    }

    pub fn playback_state(&self) -> GlobalPlaybackState {
        GlobalPlaybackState {
            volume: self.audio_volume,
            is_mute: self.mute_audio,
            is_static_wallpaper: self.static_wallpaper,
            blur_radius: self.blur_radius,
            pause_when_maximized: self.pause_when_maximized,
            mute_when_maximized: self.mute_when_maximized,
        }
    }

    pub fn video_dir(&self) -> PathBuf {
        self.daemon
            .video_dir
            .clone()
            .unwrap_or_else(MediaDiscovery::default_video_dir)
    }
}

/// Owns the in-memory configuration and decides when to write it back.
///
/// Persistence is last writer wins: another process writing the same file
/// between our load and our flush loses its change, and vice versa.
pub struct ConfigStore {
    path: PathBuf,
    current: Config,
    dirty_since: Option<Instant>,
    last_change: Option<Instant>,
}

impl ConfigStore {
    /// Loads `path`, writing defaults first if the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let current = if path.exists() {
            Config::load_from(&path)?
        } else {
            let defaults = Config::default();
            defaults.save_to(&path)?;
            log::info!("Wrote default configuration to {:?}", path);
            defaults
        };

        Ok(Self {
            path,
            current,
            dirty_since: None,
            last_change: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current(&self) -> &Config {
        &self.current
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty_since.is_some()
    }

    pub fn update<R>(&mut self, change: impl FnOnce(&mut Config) -> R) -> R {
        self.update_at(Instant::now(), change)
    }

    pub fn update_at<R>(&mut self, now: Instant, change: impl FnOnce(&mut Config) -> R) -> R {
        let result = change(&mut self.current);
        self.dirty_since.get_or_insert(now);
        self.last_change = Some(now);
        result
    }

    /// Due once the config has been quiet for `save_debounce`, or once a
    /// continuous burst has kept it dirty for too long.
    pub fn flush_due(&self, now: Instant) -> bool {
        let (Some(dirty_since), Some(last_change)) = (self.dirty_since, self.last_change) else {
            return false;
        };
        let debounce = self.current.daemon.save_debounce;

        now.saturating_duration_since(last_change) >= debounce
            || now.saturating_duration_since(dirty_since) >= debounce * MAX_FLUSH_DELAY_FACTOR
    }

    pub fn flush_if_due(&mut self, now: Instant) -> Result<bool> {
        if !self.flush_due(now) {
            return Ok(false);
        }
        self.flush()?;
        Ok(true)
    }

    /// Writes immediately if dirty. On failure the store stays dirty.
    pub fn flush(&mut self) -> Result<()> {
        if !self.is_dirty() {
            return Ok(());
        }
        self.current.save_to(&self.path)?;
        if let Some(dirty_since) = self.dirty_since {
            log::info!(
                "Saved configuration to {:?} after {}",
                self.path,
                humantime::format_duration(round_to_millis(dirty_since.elapsed()))
            );
        }
        self.dirty_since = None;
        self.last_change = None;
        Ok(())
    }

    /// Re-reads the file. A parse or validation failure keeps the
    /// last-known-good config and is returned to the caller.
    /// Unflushed local changes are discarded on success.
    pub fn reload(&mut self) -> Result<&Config> {
        match Config::load_from(&self.path) {
            Ok(config) => {
                if self.is_dirty() {
                    log::warn!("Reload discards unsaved configuration changes");
                }
                self.current = config;
                self.dirty_since = None;
                self.last_change = None;
                Ok(&self.current)
            }
            Err(e) => {
                log::warn!("Keeping last-known-good configuration: {}", e);
                Err(e)
            }
        }
    }
}

fn round_to_millis(duration: Duration) -> Duration {
    Duration::from_millis(duration.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_common::ContentRef;
    use tempfile::tempdir;
    use std::fs;

    const SAMPLE: &str = r#"
        mode = "video"
        audio_volume = 30
        mute_audio = true
        static_wallpaper = true
        blur_radius = 12
        first_time = false

        [data_source]
        Default = "/videos/a.mp4"
        "HDMI-1" = "/videos/b.mp4"

        [daemon]
        monitor_poll_interval = "500ms"
        save_debounce = "2s"
        display_provider = "wlr-randr"
    "#;

    #[test]
    fn test_parse_full_config() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.mode, Mode::Video);
        assert_eq!(config.audio_volume, 30);
        assert!(config.pause_when_maximized);
        assert_eq!(config.data_source.get("HDMI-1"), Some(&ContentRef::new("/videos/b.mp4")));
        assert_eq!(config.daemon.monitor_poll_interval, Duration::from_millis(500));
        assert_eq!(config.daemon.save_debounce, Duration::from_secs(2));
        assert_eq!(config.daemon.validation_timeout, Duration::from_secs(10));
        assert_eq!(config.daemon.display_provider, ProviderKind::WlrRandr);
        assert_eq!(config.daemon.player_command, "mpv");

        let playback = config.playback_state();
        assert!(playback.is_mute);
        assert!(playback.is_static_wallpaper);
        assert_eq!(playback.blur_radius, 12);
    }

    #[test]
    fn test_missing_default_is_rejected() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "[data_source]\n\"HDMI-1\" = \"b.mp4\"\n").unwrap();

        match Config::load_from(&config_path) {
            Err(LumenError::Config(ConfigError::MissingDefault)) => {}
            other => panic!("Expected MissingDefault, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_data_source_is_a_parse_error() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "mode = \"video\"\n").unwrap();

        assert!(matches!(
            Config::load_from(&config_path),
            Err(LumenError::Config(ConfigError::TomlParse { .. }))
        ));
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.audio_volume = 101;
        assert!(config.validate().is_err());

        config.audio_volume = 100;
        config.daemon.monitor_poll_interval = Duration::from_millis(10);
        assert!(config.validate().is_err());

        config.daemon.monitor_poll_interval = Duration::from_secs(2);
        config.daemon.player_command = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_open_writes_defaults_when_missing() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("lumen").join("config.toml");

        let store = ConfigStore::open(&config_path).unwrap();
        assert!(config_path.exists());
        assert!(store.current().first_time);
        assert_eq!(store.current().data_source.default_source(), Some(&ContentRef::new("")));

        // The written defaults load back unchanged
        assert_eq!(&Config::load_from(&config_path).unwrap(), store.current());
    }

    #[test]
    fn test_save_and_load_preserves_sources() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.mode = Mode::Playlist;
        config.active_playlist = Some("Evening".to_string());
        config.save_to(&config_path).unwrap();

        let loaded = Config::load_from(&config_path).unwrap();
        assert_eq!(loaded, config);
        assert!(!temp_dir.path().join("config.toml.tmp").exists());
    }

    #[test]
    fn test_debounce_coalesces_bursts() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        let mut store = ConfigStore::open(&config_path).unwrap();
        let debounce = store.current().daemon.save_debounce;

        let start = Instant::now();
        store.update_at(start, |c| c.audio_volume = 10);
        store.update_at(start + debounce / 2, |c| c.audio_volume = 20);

        assert!(!store.flush_due(start + debounce));
        assert!(store.flush_due(start + debounce / 2 + debounce));

        assert!(store.flush_if_due(start + debounce * 2).unwrap());
        assert!(!store.is_dirty());
        assert_eq!(Config::load_from(&config_path).unwrap().audio_volume, 20);
    }

    #[test]
    fn test_continuous_changes_still_flush() {
        let temp_dir = tempdir().unwrap();
        let mut store = ConfigStore::open(temp_dir.path().join("config.toml")).unwrap();
        let debounce = store.current().daemon.save_debounce;

        let start = Instant::now();
        let step = debounce / 4;
        let mut now = start;
        for volume in 0..(MAX_FLUSH_DELAY_FACTOR * 4) as u8 {
            store.update_at(now, |c| c.audio_volume = volume);
            now += step;
        }

        // Never quiet for a full debounce period, but the burst is bounded
        assert!(store.flush_due(start + debounce * MAX_FLUSH_DELAY_FACTOR));
    }

    #[test]
    fn test_reload_keeps_last_known_good() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, SAMPLE).unwrap();
        let mut store = ConfigStore::open(&config_path).unwrap();

        // Another process caught mid-write
        fs::write(&config_path, "mode = \"video\"\n[data_source\n").unwrap();
        assert!(store.reload().is_err());
        assert_eq!(store.current().audio_volume, 30);

        fs::write(&config_path, SAMPLE.replace("audio_volume = 30", "audio_volume = 80")).unwrap();
        assert_eq!(store.reload().unwrap().audio_volume, 80);
    }

    #[test]
    fn test_concurrent_writers_last_one_wins() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, SAMPLE).unwrap();

        let mut daemon = ConfigStore::open(&config_path).unwrap();
        let mut panel = ConfigStore::open(&config_path).unwrap();

        daemon.update(|c| c.audio_volume = 90);
        panel.update(|c| c.mute_audio = false);

        daemon.flush().unwrap();
        panel.flush().unwrap();

        // The panel's write was based on a stale read, so the daemon's
        // volume change is gone while the panel's mute change survives
        let on_disk = Config::load_from(&config_path).unwrap();
        assert_eq!(on_disk.audio_volume, 30);
        assert!(!on_disk.mute_audio);

        daemon.reload().unwrap();
        assert_eq!(daemon.current().audio_volume, 30);
    }

    #[test]
    fn test_video_dir_override() {
        let mut config = Config::default();
        assert!(config.video_dir().ends_with("Lumen"));

        config.daemon.video_dir = Some(PathBuf::from("/srv/wallpapers"));
        assert_eq!(config.video_dir(), PathBuf::from("/srv/wallpapers"));
    }
}
