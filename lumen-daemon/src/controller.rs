//! Owns every piece of runtime state and applies control commands to it.

use std::path::PathBuf;
use std::time::{Duration, Instant};
use lumen_common::{
    error::{NotFoundError, ValidationError},
    BackendFactory, ContentRef, DisplayProvider, ErrorReporting, IpcCommand, IpcResponse, LumenError,
    MediaDiscovery, Mode, MonitorRegistry, PlaybackBinding, PlaylistStore, Property, PropertyValue,
    Result, SourceContext,
};
use lumen_config::ConfigStore;
use crate::validation::PendingSource;

/// Name accepted by the video command to target every known monitor.
pub const ALL_MONITORS: &str = "all";

/// What the control loop should do after a command.
#[derive(Debug)]
pub enum Outcome {
    Reply(IpcResponse),
    /// Run the network check, then call [`Orchestrator::finish_validation`].
    Validate(PendingSource),
    Quit(IpcResponse),
}

type Failures = Vec<(String, LumenError)>;

fn summarize(message: String, failures: Failures) -> IpcResponse {
    if failures.is_empty() {
        return IpcResponse::Success { message };
    }
    let details: Vec<String> = failures
        .iter()
        .map(|(monitor, e)| format!("{}: {}", monitor, e.user_friendly_message()))
        .collect();
    IpcResponse::Error {
        message: format!("{}, but some monitors failed ({})", message, details.join("; ")),
    }
}

fn error_response(e: &LumenError, context: &str) -> IpcResponse {
    e.log_error(context);
    IpcResponse::Error {
        message: e.user_friendly_message(),
    }
}

pub struct Orchestrator<P, F: BackendFactory> {
    registry: MonitorRegistry<P>,
    binding: PlaybackBinding<F>,
    config: ConfigStore,
    playlists: PlaylistStore,
    playlist_path: PathBuf,
}

impl<P: DisplayProvider, F: BackendFactory> Orchestrator<P, F> {
    pub fn new(provider: P, factory: F, config: ConfigStore, playlist_path: impl Into<PathBuf>) -> Self {
        let playlist_path = playlist_path.into();
        let mut playlists = PlaylistStore::load(&playlist_path).unwrap_or_else(|e| {
            e.log_error("Failed to load playlists, starting empty");
            PlaylistStore::new()
        });
        playlists.restore_active(config.current().active_playlist.as_deref());

        let binding = PlaybackBinding::new(factory, config.current().playback_state());

        Self {
            registry: MonitorRegistry::new(provider),
            binding,
            config,
            playlists,
            playlist_path,
        }
    }

    #[allow(dead_code)]
    pub fn binding(&self) -> &PlaybackBinding<F> {
        &self.binding
    }

    #[allow(dead_code)]
    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    #[allow(dead_code)]
    pub fn playlists(&self) -> &PlaylistStore {
        &self.playlists
    }

    pub fn poll_interval(&self) -> Duration {
        self.config.current().daemon.monitor_poll_interval
    }

    pub fn validation_timeout(&self) -> Duration {
        self.config.current().daemon.validation_timeout
    }

    /// Binds every display found at startup and clears the first-run flag.
    pub fn startup(&mut self) {
        let failures = self.refresh_monitors();
        for (monitor, e) in &failures {
            e.log_error(&format!("Monitor {} starts unbound", monitor));
        }

        if self.config.current().first_time {
            log::info!(
                "First run: put videos in {:?} and try `lumen-cli lucky`, or `lumen-cli video <path>`",
                self.config.current().video_dir()
            );
            self.config.update(|c| c.first_time = false);
            if let Err(e) = self.config.flush() {
                e.log_error("Failed to persist first-run flag");
            }
        }

        log::info!(
            "Orchestrating {} monitors in {} mode",
            self.registry.snapshot().len(),
            self.config.current().mode
        );
    }

    /// Polls the display provider, retries monitors whose player failed
    /// earlier, then applies topology changes. A failed query keeps the
    /// current bindings.
    pub fn refresh_monitors(&mut self) -> Failures {
        let current = self.config.current();
        let context = SourceContext::new(current.mode, &current.data_source, &self.playlists);

        for (monitor, e) in self.binding.retry_failed(&context) {
            log::debug!("Monitor {} still failing: {}", monitor, e);
        }

        match self.registry.update() {
            Ok(changes) if changes.is_empty() => Vec::new(),
            Ok(changes) => self.binding.sync(&changes, &context),
            Err(e) => {
                e.log_error("Display query failed, keeping previous monitors");
                Vec::new()
            }
        }
    }

    fn rebind_all(&mut self) -> Failures {
        let current = self.config.current();
        let context = SourceContext::new(current.mode, &current.data_source, &self.playlists);
        self.binding.rebind_all(&context)
    }

    pub fn flush_if_due(&mut self, now: Instant) {
        if let Err(e) = self.config.flush_if_due(now) {
            e.log_error("Failed to save configuration");
        }
    }

    pub fn shutdown(&mut self) {
        self.binding.shutdown();
        if let Err(e) = self.config.flush() {
            e.log_error("Failed to save configuration on shutdown");
        }
        log::info!("All players released");
    }

    pub fn handle(&mut self, command: IpcCommand) -> Outcome {
        let response = match command {
            IpcCommand::PausePlayback => {
                summarize("Playback paused".to_string(), self.binding.set_paused_by_user(true))
            }
            IpcCommand::StartPlayback => {
                summarize("Playback started".to_string(), self.binding.set_paused_by_user(false))
            }
            IpcCommand::Quit => {
                return Outcome::Quit(IpcResponse::Success {
                    message: "Shutting down".to_string(),
                })
            }
            IpcCommand::FeelingLucky => self.feeling_lucky(),
            IpcCommand::Get { property } => IpcResponse::Property {
                value: self.property(property),
            },
            IpcCommand::Set { value } => self.set_property(value),
            IpcCommand::Video { path, monitor } => {
                self.apply_video(ContentRef::new(path), monitor.as_deref())
                    .unwrap_or_else(|e| error_response(&e, "Video source rejected"))
            }
            IpcCommand::Webpage { url } => {
                return Outcome::Validate(PendingSource::new(Mode::Webpage, ContentRef::new(url)))
            }
            IpcCommand::Stream { url } => {
                return Outcome::Validate(PendingSource::new(Mode::Stream, ContentRef::new(url)))
            }
            IpcCommand::Playlist { name } => self
                .activate_playlist(&name)
                .unwrap_or_else(|e| error_response(&e, "Playlist activation failed")),
            IpcCommand::WindowMaximized { maximized } => summarize(
                format!("Window {}", if maximized { "maximized" } else { "restored" }),
                self.binding.set_window_maximized(maximized),
            ),
            IpcCommand::Reload => self.reload(),
            IpcCommand::Status => self.status(),
        };

        Outcome::Reply(response)
    }

    /// Applies a web page or stream once its check has come back.
    /// On failure the previous content keeps playing.
    pub fn finish_validation(&mut self, pending: PendingSource, result: Result<()>) -> IpcResponse {
        if let Err(e) = result {
            return error_response(&e, &format!("Keeping current content, {} check failed", pending.mode));
        }

        let mode = pending.mode;
        self.config.update(|c| {
            c.mode = mode;
            c.data_source.set_default(pending.content.clone());
        });
        log::info!("Switched to {} mode: {}", mode, pending.content);

        summarize(format!("Playing {}", pending.content), self.rebind_all())
    }

    /// `monitor` of `None` updates `Default`; a name updates that monitor and
    /// `Default`; `"all"` updates every known monitor and `Default`.
    fn apply_video(&mut self, content: ContentRef, monitor: Option<&str>) -> Result<IpcResponse> {
        if content.is_empty() {
            return Err(ValidationError::EmptySelection {
                operation: "video".to_string(),
            }
            .into());
        }
        if let Some(path) = content.local_path() {
            if !path.is_file() {
                return Err(ValidationError::MissingFile { path }.into());
            }
        }

        let targets: Vec<String> = match monitor {
            None => Vec::new(),
            Some(ALL_MONITORS) => self.registry.snapshot().iter().map(|m| m.name.clone()).collect(),
            Some(name) => {
                let known = self.registry.get(name).is_some()
                    || self.config.current().data_source.get(name).is_some();
                if !known {
                    return Err(NotFoundError::Monitor { name: name.to_string() }.into());
                }
                vec![name.to_string()]
            }
        };

        self.config.update(|c| {
            c.mode = Mode::Video;
            for target in &targets {
                c.data_source.set(target.as_str(), content.clone());
            }
            c.data_source.set_default(content.clone());
        });
        log::info!("Video source {} set for {}", content, monitor.unwrap_or("Default"));

        Ok(summarize(format!("Playing {}", content), self.rebind_all()))
    }

    fn feeling_lucky(&mut self) -> IpcResponse {
        let video_dir = self.config.current().video_dir();
        match MediaDiscovery::pick_random(&video_dir) {
            Ok(path) => {
                log::info!("Feeling lucky: {:?}", path);
                self.apply_video(path.as_path().into(), None)
                    .unwrap_or_else(|e| error_response(&e, "Feeling lucky failed"))
            }
            Err(e) => error_response(&e, "Feeling lucky failed"),
        }
    }

    fn activate_playlist(&mut self, name: &str) -> Result<IpcResponse> {
        // The CLI edits the store file directly, so pick up its changes first
        self.reload_playlists();
        self.playlists.activate(name)?;

        let active = name.to_string();
        self.config.update(|c| {
            c.mode = Mode::Playlist;
            c.active_playlist = Some(active);
        });
        log::info!("Activated playlist '{}'", name);

        Ok(summarize(format!("Playing playlist '{}'", name), self.rebind_all()))
    }

    fn reload_playlists(&mut self) {
        match PlaylistStore::load(&self.playlist_path) {
            Ok(mut store) => {
                store.restore_active(self.config.current().active_playlist.as_deref());
                self.playlists = store;
            }
            Err(e) => e.log_error("Keeping in-memory playlists"),
        }
    }

    fn reload(&mut self) -> IpcResponse {
        if let Err(e) = self.config.reload() {
            return error_response(&e, "Reload failed, keeping last-known-good configuration");
        }
        self.reload_playlists();

        let mut failures = self.binding.set_playback(self.config.current().playback_state());
        failures.extend(self.rebind_all());
        summarize("Configuration reloaded".to_string(), failures)
    }

    fn property(&self, property: Property) -> PropertyValue {
        let current = self.config.current();
        match property {
            Property::Volume => PropertyValue::Volume(current.audio_volume),
            Property::IsMute => PropertyValue::IsMute(current.mute_audio),
            Property::BlurRadius => PropertyValue::BlurRadius(current.blur_radius),
            Property::IsStaticWallpaper => PropertyValue::IsStaticWallpaper(current.static_wallpaper),
            Property::IsPauseWhenMaximized => PropertyValue::IsPauseWhenMaximized(current.pause_when_maximized),
            Property::IsMuteWhenMaximized => PropertyValue::IsMuteWhenMaximized(current.mute_when_maximized),
            Property::IsPausedByUser => PropertyValue::IsPausedByUser(self.binding.pause_state().paused_by_user),
        }
    }

    fn set_property(&mut self, value: PropertyValue) -> IpcResponse {
        let message = format!("{} set to {}", value.property(), value);

        let failures = match value {
            PropertyValue::IsPausedByUser(paused) => self.binding.set_paused_by_user(paused),
            PropertyValue::Volume(volume) if volume > 100 => {
                let e = LumenError::from(ValidationError::InvalidValue {
                    field: "volume".to_string(),
                    value: volume.to_string(),
                });
                return error_response(&e, "Rejected property");
            }
            _ => {
                self.config.update(|c| match value {
                    PropertyValue::Volume(v) => c.audio_volume = v,
                    PropertyValue::IsMute(v) => c.mute_audio = v,
                    PropertyValue::BlurRadius(v) => c.blur_radius = v,
                    PropertyValue::IsStaticWallpaper(v) => c.static_wallpaper = v,
                    PropertyValue::IsPauseWhenMaximized(v) => c.pause_when_maximized = v,
                    PropertyValue::IsMuteWhenMaximized(v) => c.mute_when_maximized = v,
                    PropertyValue::IsPausedByUser(_) => {}
                });
                self.binding.set_playback(self.config.current().playback_state())
            }
        };

        log::debug!("{}", message);
        summarize(message, failures)
    }

    fn status(&self) -> IpcResponse {
        let current = self.config.current();
        IpcResponse::Status {
            mode: current.mode,
            active_playlist: self.playlists.active_playlist().map(str::to_string),
            paused: self.binding.is_paused(),
            playback: *self.binding.playback(),
            monitors: self.binding.status(),
        }
    }
}
