//! Decides which content a monitor should be playing.
//!
//! Everything here is pure: no I/O, no display access.

use crate::content::{ContentRef, SourceBinding};
use crate::error::{ConfigError, LumenError};
use crate::playlist::PlaylistStore;
use crate::{Mode, Result};

/// Borrowed view of everything [`resolve`] needs.
#[derive(Debug, Clone, Copy)]
pub struct SourceContext<'a> {
    pub mode: Mode,
    pub sources: &'a SourceBinding,
    pub playlists: &'a PlaylistStore,
}

impl<'a> SourceContext<'a> {
    pub fn new(mode: Mode, sources: &'a SourceBinding, playlists: &'a PlaylistStore) -> Self {
        Self { mode, sources, playlists }
    }

    pub fn resolve(&self, monitor_name: &str) -> Result<Vec<ContentRef>> {
        resolve(monitor_name, self.mode, self.sources, self.playlists)
    }
}

/// Content sequence for `monitor_name` under the current mode.
///
/// Single-source modes yield exactly one element, taken from the monitor's
/// own entry or from `Default`. Playlist mode yields the active playlist's
/// list for the monitor, which may be empty.
pub fn resolve(
    monitor_name: &str,
    mode: Mode,
    sources: &SourceBinding,
    playlists: &PlaylistStore,
) -> Result<Vec<ContentRef>> {
    match mode {
        Mode::Video | Mode::Webpage | Mode::Stream => sources
            .get(monitor_name)
            .or_else(|| sources.default_source())
            .map(|content| vec![content.clone()])
            .ok_or(LumenError::Config(ConfigError::MissingDefault)),
        Mode::Playlist => {
            let name = playlists
                .active_playlist()
                .ok_or(LumenError::Config(ConfigError::NoActivePlaylist))?;
            let entries = playlists.entries(name).ok_or_else(|| {
                LumenError::Config(ConfigError::ActivePlaylistMissing { name: name.to_string() })
            })?;
            Ok(entries.get(monitor_name).cloned().unwrap_or_default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playlist::PlaylistEntries;

    fn scenario_sources() -> SourceBinding {
        let mut sources = SourceBinding::new("a.mp4".into());
        sources.set("HDMI-1", "b.mp4".into());
        sources
    }

    #[test]
    fn test_two_monitor_scenario() {
        let sources = scenario_sources();
        let playlists = PlaylistStore::new();

        assert_eq!(
            resolve("DP-1", Mode::Video, &sources, &playlists).unwrap(),
            vec![ContentRef::new("a.mp4")]
        );
        assert_eq!(
            resolve("HDMI-1", Mode::Video, &sources, &playlists).unwrap(),
            vec![ContentRef::new("b.mp4")]
        );
    }

    #[test]
    fn test_unknown_names_fall_back_to_default() {
        let sources = scenario_sources();
        let playlists = PlaylistStore::new();

        for name in ["DP-2", "eDP-1", "", "default"] {
            for mode in [Mode::Video, Mode::Webpage, Mode::Stream] {
                let first = resolve(name, mode, &sources, &playlists).unwrap();
                let second = resolve(name, mode, &sources, &playlists).unwrap();
                assert_eq!(first, vec![ContentRef::new("a.mp4")]);
                assert_eq!(first, second);
            }
        }
    }

    #[test]
    fn test_missing_default_is_reported() {
        let sources: SourceBinding = [("HDMI-1".to_string(), ContentRef::new("b.mp4"))]
            .into_iter()
            .collect();
        let playlists = PlaylistStore::new();

        assert!(resolve("HDMI-1", Mode::Video, &sources, &playlists).is_ok());
        assert!(matches!(
            resolve("DP-1", Mode::Video, &sources, &playlists),
            Err(LumenError::Config(ConfigError::MissingDefault))
        ));
    }

    #[test]
    fn test_playlist_mode_uses_active_playlist() {
        let sources = scenario_sources();
        let mut playlists = PlaylistStore::new();
        let mut entries = PlaylistEntries::new();
        entries.insert("DP-1".into(), vec!["x.mp4".into(), "y.mp4".into()]);
        playlists.create_or_save("P1", entries).unwrap();
        playlists.activate("P1").unwrap();

        let context = SourceContext::new(Mode::Playlist, &sources, &playlists);
        assert_eq!(
            context.resolve("DP-1").unwrap(),
            vec![ContentRef::new("x.mp4"), ContentRef::new("y.mp4")]
        );
        // Excluded monitor idles rather than erroring
        assert!(context.resolve("HDMI-1").unwrap().is_empty());
    }

    #[test]
    fn test_playlist_mode_without_selection() {
        let sources = scenario_sources();
        let playlists = PlaylistStore::new();
        assert!(matches!(
            resolve("DP-1", Mode::Playlist, &sources, &playlists),
            Err(LumenError::Config(ConfigError::NoActivePlaylist))
        ));
    }
}
