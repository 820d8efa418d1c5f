use std::collections::BTreeMap;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use crate::content::ContentRef;
use crate::error::{ErrorReporting, LumenError, NotFoundError};
use crate::monitor::{Geometry, Monitor, MonitorDiff};
use crate::resolver::SourceContext;
use crate::Result;

/// Which kind of player a monitor needs for the current mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Video,
    Stream,
    Web,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Video => write!(f, "video"),
            BackendKind::Stream => write!(f, "stream"),
            BackendKind::Web => write!(f, "web"),
        }
    }
}

/// One rendering surface plus the player drawing into it.
pub trait PlayerBackend {
    fn kind(&self) -> BackendKind;

    /// Starts `content`; `queue` is what the player advances through on its own
    /// once `content` ends.
    fn load(&mut self, content: &ContentRef, queue: &[ContentRef]) -> Result<()>;

    /// Nothing to play for this monitor.
    fn idle(&mut self) -> Result<()>;

    fn play(&mut self) -> Result<()>;
    fn pause(&mut self) -> Result<()>;
    fn set_mute(&mut self, mute: bool) -> Result<()>;
    fn set_volume(&mut self, volume: u8) -> Result<()>;

    /// `Some(radius)` while the static-wallpaper effect is on.
    fn set_blur(&mut self, radius: Option<u32>) -> Result<()>;

    fn reposition(&mut self, geometry: Geometry) -> Result<()>;

    /// Tears down the player and its surface. Must tolerate repeated calls.
    fn release(&mut self);
}

/// Allocates a surface and player for a monitor.
pub trait BackendFactory {
    type Player: PlayerBackend;

    fn create(&mut self, monitor: &Monitor, kind: BackendKind) -> Result<Self::Player>;
}

/// Audio and pause settings mirrored into every player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalPlaybackState {
    pub volume: u8,
    pub is_mute: bool,
    pub is_static_wallpaper: bool,
    pub blur_radius: u32,
    pub pause_when_maximized: bool,
    pub mute_when_maximized: bool,
}

impl Default for GlobalPlaybackState {
    fn default() -> Self {
        Self {
            volume: 50,
            is_mute: false,
            is_static_wallpaper: false,
            blur_radius: 5,
            pause_when_maximized: true,
            mute_when_maximized: false,
        }
    }
}

/// Runtime pause sources. A user pause survives a maximize/un-maximize cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseState {
    pub paused_by_user: bool,
    pub window_maximized: bool,
}

impl PauseState {
    pub fn paused_by_maximize(&self, playback: &GlobalPlaybackState) -> bool {
        self.window_maximized && playback.pause_when_maximized
    }

    pub fn is_paused(&self, playback: &GlobalPlaybackState) -> bool {
        self.paused_by_user || self.paused_by_maximize(playback)
    }
}

/// Only the primary monitor ever produces sound.
pub fn effective_mute(is_primary: bool, playback: &GlobalPlaybackState, pause: &PauseState) -> bool {
    !is_primary || playback.is_mute || (pause.window_maximized && playback.mute_when_maximized)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindState {
    Unbound,
    Bound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub name: String,
    pub geometry: Geometry,
    pub is_primary: bool,
    pub state: BindState,
    pub backend: Option<BackendKind>,
    pub current: Option<ContentRef>,
    pub queued: usize,
    pub muted: bool,
    pub bound_since: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

struct Slot<P> {
    monitor: Monitor,
    player: Option<P>,
    /// `None` until the player has been given content or told to idle.
    loaded: Option<Vec<ContentRef>>,
    bound_since: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl<P: PlayerBackend> Slot<P> {
    fn unbound(monitor: Monitor) -> Self {
        Self {
            monitor,
            player: None,
            loaded: None,
            bound_since: None,
            last_error: None,
        }
    }

    fn release(&mut self) {
        if let Some(mut player) = self.player.take() {
            player.release();
        }
        self.loaded = None;
        self.bound_since = None;
        self.monitor.current_source = None;
    }
}

fn apply_to_player<P: PlayerBackend>(
    player: &mut P,
    monitor: &Monitor,
    playback: &GlobalPlaybackState,
    pause: &PauseState,
) -> Result<()> {
    player.set_volume(playback.volume)?;
    player.set_mute(effective_mute(monitor.is_primary, playback, pause))?;
    player.set_blur(playback.is_static_wallpaper.then_some(playback.blur_radius))?;
    if pause.is_paused(playback) {
        player.pause()
    } else {
        player.play()
    }
}

/// Owns one player per live monitor and keeps it playing the resolved content.
///
/// All transitions go through `&mut self`, so a monitor can never be bound and
/// unbound concurrently.
pub struct PlaybackBinding<F: BackendFactory> {
    factory: F,
    slots: BTreeMap<String, Slot<F::Player>>,
    playback: GlobalPlaybackState,
    pause: PauseState,
}

impl<F: BackendFactory> PlaybackBinding<F> {
    pub fn new(factory: F, playback: GlobalPlaybackState) -> Self {
        Self {
            factory,
            slots: BTreeMap::new(),
            playback,
            pause: PauseState::default(),
        }
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn playback(&self) -> &GlobalPlaybackState {
        &self.playback
    }

    pub fn pause_state(&self) -> &PauseState {
        &self.pause
    }

    pub fn is_paused(&self) -> bool {
        self.pause.is_paused(&self.playback)
    }

    pub fn state(&self, monitor_name: &str) -> BindState {
        match self.slots.get(monitor_name) {
            Some(slot) if slot.player.is_some() => BindState::Bound,
            _ => BindState::Unbound,
        }
    }

    pub fn loaded(&self, monitor_name: &str) -> Option<&[ContentRef]> {
        self.slots.get(monitor_name).and_then(|slot| slot.loaded.as_deref())
    }

    pub fn monitor_names(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    /// Applies a registry diff: removals first, then in-place changes, then additions.
    pub fn sync(&mut self, changes: &MonitorDiff, context: &SourceContext<'_>) -> Vec<(String, LumenError)> {
        let mut failures = Vec::new();

        for monitor in &changes.removed {
            self.on_monitor_removed(&monitor.name);
        }
        for monitor in &changes.changed {
            if let Err(e) = self.on_monitor_changed(monitor, context) {
                failures.push((monitor.name.clone(), e));
            }
        }
        for monitor in &changes.added {
            if let Err(e) = self.on_monitor_added(monitor, context) {
                failures.push((monitor.name.clone(), e));
            }
        }

        failures
    }

    /// Allocates a surface and player sized to the monitor, then loads its content.
    ///
    /// An allocation failure leaves only this monitor unbound.
    pub fn on_monitor_added(&mut self, monitor: &Monitor, context: &SourceContext<'_>) -> Result<()> {
        if self.state(&monitor.name) == BindState::Bound {
            return self.on_monitor_changed(monitor, context);
        }

        let kind = context.mode.backend_kind();
        let mut slot = Slot::unbound(monitor.clone());
        slot.monitor.current_source = None;

        match self.factory.create(monitor, kind) {
            Ok(player) => {
                log::info!("Bound {} to a {} player", monitor, kind);
                slot.player = Some(player);
                slot.bound_since = Some(Utc::now());
                self.slots.insert(monitor.name.clone(), slot);
                self.rebind(&monitor.name, context).map(|_| ())
            }
            Err(e) => {
                e.log_error(&format!("Failed to bind {}", monitor.name));
                slot.last_error = Some(e.to_string());
                self.slots.insert(monitor.name.clone(), slot);
                Err(e)
            }
        }
    }

    /// Releases the player and surface. Unknown or already unbound monitors
    /// are a no-op; returns whether anything was released.
    pub fn on_monitor_removed(&mut self, monitor_name: &str) -> bool {
        match self.slots.remove(monitor_name) {
            Some(mut slot) => {
                let was_bound = slot.player.is_some();
                slot.release();
                log::info!("Unbound {}", monitor_name);
                was_bound
            }
            None => false,
        }
    }

    /// Geometry or primary flag changed; identity and player are kept.
    pub fn on_monitor_changed(&mut self, monitor: &Monitor, context: &SourceContext<'_>) -> Result<()> {
        let playback = self.playback;
        let pause = self.pause;

        let Some(slot) = self.slots.get_mut(&monitor.name) else {
            return self.on_monitor_added(monitor, context);
        };

        let moved = slot.monitor.geometry != monitor.geometry;
        slot.monitor.geometry = monitor.geometry;
        slot.monitor.is_primary = monitor.is_primary;

        match slot.player.as_mut() {
            Some(player) => {
                if moved {
                    log::debug!("Moving surface of {} to {}", monitor.name, monitor.geometry);
                    player.reposition(monitor.geometry)?;
                }
                // The primary flag may have moved, which changes the mute policy
                apply_to_player(player, &slot.monitor, &playback, &pause)
            }
            None => self.rebind(&monitor.name, context).map(|_| ()),
        }
    }

    /// Loads the resolved content if it differs from what is playing.
    ///
    /// Returns `true` when the player was told to load something new. A
    /// monitor whose player is of the wrong kind for the mode, or that failed
    /// to allocate earlier, gets a fresh player.
    pub fn rebind(&mut self, monitor_name: &str, context: &SourceContext<'_>) -> Result<bool> {
        let resolved = context.resolve(monitor_name)?;
        let playback = self.playback;
        let pause = self.pause;
        let kind = context.mode.backend_kind();

        let slot = self.slots.get_mut(monitor_name).ok_or_else(|| {
            LumenError::NotFound(NotFoundError::Monitor {
                name: monitor_name.to_string(),
            })
        })?;

        let needs_player = slot.player.as_ref().map_or(true, |player| player.kind() != kind);
        if needs_player {
            slot.release();
            match self.factory.create(&slot.monitor, kind) {
                Ok(player) => {
                    log::info!("Bound {} to a {} player", slot.monitor, kind);
                    slot.player = Some(player);
                    slot.bound_since = Some(Utc::now());
                    slot.last_error = None;
                }
                Err(e) => {
                    slot.last_error = Some(e.to_string());
                    return Err(e);
                }
            }
        }

        let playable: Vec<ContentRef> = resolved.into_iter().filter(|c| !c.is_empty()).collect();
        if slot.loaded.as_ref() == Some(&playable) {
            log::debug!("{} already plays the resolved content", monitor_name);
            return Ok(false);
        }

        let Some(player) = slot.player.as_mut() else {
            return Ok(false);
        };

        // Players get global state before any content
        let result = apply_to_player(player, &slot.monitor, &playback, &pause).and_then(|()| {
            match playable.split_first() {
                Some((first, queue)) => {
                    log::info!("Loading {} on {} ({} queued)", first, monitor_name, queue.len());
                    player.load(first, queue)
                }
                None => {
                    log::info!("Nothing to play on {}, idling", monitor_name);
                    player.idle()
                }
            }
        });

        if let Err(e) = result {
            slot.last_error = Some(e.to_string());
            return Err(e);
        }

        slot.monitor.current_source = playable.first().cloned();
        slot.loaded = Some(playable);
        slot.last_error = None;
        Ok(true)
    }

    /// Rebinds every known monitor, collecting per-monitor failures.
    pub fn rebind_all(&mut self, context: &SourceContext<'_>) -> Vec<(String, LumenError)> {
        let names: Vec<String> = self.slots.keys().cloned().collect();
        let mut failures = Vec::new();
        for name in names {
            if let Err(e) = self.rebind(&name, context) {
                e.log_error(&format!("Failed to rebind {}", name));
                failures.push((name, e));
            }
        }
        failures
    }

    /// Monitors whose last bind or load attempt failed.
    pub fn failed_monitors(&self) -> Vec<String> {
        self.slots
            .iter()
            .filter(|(_, slot)| slot.last_error.is_some())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Rebinds only the monitors whose last attempt failed.
    pub fn retry_failed(&mut self, context: &SourceContext<'_>) -> Vec<(String, LumenError)> {
        let mut failures = Vec::new();
        for name in self.failed_monitors() {
            log::debug!("Retrying {}", name);
            if let Err(e) = self.rebind(&name, context) {
                failures.push((name, e));
            }
        }
        failures
    }

    /// Pushes volume, mute, blur and pause state into every bound player.
    /// Safe to call redundantly.
    pub fn apply_global_state(&mut self) -> Vec<(String, LumenError)> {
        let playback = self.playback;
        let pause = self.pause;
        let mut failures = Vec::new();

        for (name, slot) in &mut self.slots {
            if let Some(player) = slot.player.as_mut() {
                if let Err(e) = apply_to_player(player, &slot.monitor, &playback, &pause) {
                    e.log_error(&format!("Failed to update player on {}", name));
                    failures.push((name.clone(), e));
                }
            }
        }

        failures
    }

    pub fn set_playback(&mut self, playback: GlobalPlaybackState) -> Vec<(String, LumenError)> {
        self.playback = playback;
        self.apply_global_state()
    }

    pub fn set_paused_by_user(&mut self, paused: bool) -> Vec<(String, LumenError)> {
        if self.pause.paused_by_user != paused {
            log::info!("Playback {} by user", if paused { "paused" } else { "resumed" });
        }
        self.pause.paused_by_user = paused;
        self.apply_global_state()
    }

    /// Signal from the window manager that a foreground window was
    /// maximized or restored.
    pub fn set_window_maximized(&mut self, maximized: bool) -> Vec<(String, LumenError)> {
        if self.pause.window_maximized != maximized {
            log::debug!("Foreground window {}", if maximized { "maximized" } else { "restored" });
        }
        self.pause.window_maximized = maximized;
        self.apply_global_state()
    }

    pub fn status(&self) -> Vec<MonitorStatus> {
        self.slots
            .values()
            .map(|slot| MonitorStatus {
                name: slot.monitor.name.clone(),
                geometry: slot.monitor.geometry,
                is_primary: slot.monitor.is_primary,
                state: if slot.player.is_some() { BindState::Bound } else { BindState::Unbound },
                backend: slot.player.as_ref().map(|p| p.kind()),
                current: slot.loaded.as_ref().and_then(|l| l.first().cloned()),
                queued: slot.loaded.as_ref().map_or(0, |l| l.len().saturating_sub(1)),
                muted: effective_mute(slot.monitor.is_primary, &self.playback, &self.pause),
                bound_since: slot.bound_since,
                last_error: slot.last_error.clone(),
            })
            .collect()
    }

    /// Releases every player. Used at process shutdown.
    pub fn shutdown(&mut self) {
        for (name, mut slot) in std::mem::take(&mut self.slots) {
            slot.release();
            log::debug!("Released player for {}", name);
        }
    }
}
