use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use serde::{Serialize, Deserialize};
use crate::content::ContentRef;
use crate::error::{ConfigError, LumenError, NotFoundError, StateError, ValidationError};
use crate::Result;

/// Monitor name to ordered content references.
pub type PlaylistEntries = BTreeMap<String, Vec<ContentRef>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Playlist {
    pub name: String,
    pub entries: PlaylistEntries,
}

impl Playlist {
    pub fn new(name: impl Into<String>, entries: PlaylistEntries) -> Self {
        Self {
            name: name.into(),
            entries,
        }
    }

    /// A monitor without entries plays nothing; that is not an error.
    pub fn entries_for(&self, monitor_name: &str) -> &[ContentRef] {
        self.entries
            .get(monitor_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Appends references not yet present for that monitor, keeping
    /// first-seen order. Returns how many were actually added.
    pub fn add_entries(&mut self, monitor_name: &str, refs: &[ContentRef]) -> usize {
        if refs.is_empty() {
            return 0;
        }

        let sequence = self.entries.entry(monitor_name.to_string()).or_default();
        let mut added = 0;
        for reference in refs {
            if !sequence.contains(reference) {
                sequence.push(reference.clone());
                added += 1;
            }
        }
        added
    }

    /// Removes the given references; ones that are not present are ignored.
    pub fn remove_entries(&mut self, monitor_name: &str, refs: &[ContentRef]) -> usize {
        let Some(sequence) = self.entries.get_mut(monitor_name) else {
            return 0;
        };
        let before = sequence.len();
        sequence.retain(|reference| !refs.contains(reference));
        before - sequence.len()
    }

    /// Swaps each indexed entry with its neighbour in `direction`.
    ///
    /// Left moves run in ascending index order and right moves in descending
    /// order, so within one batch no entry is pushed into a slot that is
    /// about to move again. Boundary and out-of-range indices are skipped.
    pub fn move_entries(&mut self, monitor_name: &str, indices: &[usize], direction: Direction) {
        let Some(sequence) = self.entries.get_mut(monitor_name) else {
            return;
        };

        let mut ordered: Vec<usize> = indices.to_vec();
        ordered.sort_unstable();
        ordered.dedup();
        if direction == Direction::Right {
            ordered.reverse();
        }

        let len = sequence.len();
        for index in ordered {
            match direction {
                Direction::Left if index > 0 && index < len => sequence.swap(index, index - 1),
                Direction::Right if index + 1 < len => sequence.swap(index, index + 1),
                _ => {}
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddOutcome {
    pub added: usize,
    pub requested: usize,
}

impl AddOutcome {
    pub fn nothing_selected(&self) -> bool {
        self.requested == 0
    }
}

/// Named playlists plus the active selection.
///
/// Only the playlists are persisted here; the active name lives in the main
/// configuration and is restored with [`PlaylistStore::restore_active`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistStore {
    playlists: BTreeMap<String, PlaylistEntries>,
    #[serde(skip)]
    active_playlist: Option<String>,
}

impl PlaylistStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_store_file() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("lumen")
            .join("playlists.json")
    }

    pub fn load(store_file: &Path) -> Result<Self> {
        if !store_file.exists() {
            log::info!("No playlist store found, starting empty");
            return Ok(Self::new());
        }

        let json = fs::read_to_string(store_file).map_err(|source| StateError::FileRead {
            path: store_file.to_path_buf(),
            source,
        })?;

        let store: Self = serde_json::from_str(&json).map_err(|e| ConfigError::JsonParse {
            path: store_file.to_path_buf(),
            message: e.to_string(),
        })?;

        log::debug!("Loaded {} playlists from {:?}", store.playlists.len(), store_file);
        Ok(store)
    }

    pub fn save(&self, store_file: &Path) -> Result<()> {
        if let Some(parent) = store_file.parent() {
            fs::create_dir_all(parent).map_err(|source| StateError::DirectoryCreation {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let json = serde_json::to_string_pretty(self).map_err(|e| StateError::Serialization {
            message: e.to_string(),
        })?;

        fs::write(store_file, json).map_err(|source| StateError::FileWrite {
            path: store_file.to_path_buf(),
            source,
        })?;

        log::debug!("Playlist store saved to {:?}", store_file);
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.playlists.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.playlists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.playlists.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.playlists.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Playlist> {
        self.playlists
            .get(name)
            .map(|entries| Playlist::new(name, entries.clone()))
    }

    pub fn entries(&self, name: &str) -> Option<&PlaylistEntries> {
        self.playlists.get(name)
    }

    pub fn active_playlist(&self) -> Option<&str> {
        self.active_playlist.as_deref()
    }

    /// Entries of the active playlist, if one is selected and still exists.
    pub fn active_entries(&self) -> Option<&PlaylistEntries> {
        self.active_playlist
            .as_deref()
            .and_then(|name| self.playlists.get(name))
    }

    /// Creates or overwrites a playlist. An existing playlist with the same
    /// name is replaced wholesale.
    pub fn create_or_save(&mut self, name: &str, entries: PlaylistEntries) -> Result<()> {
        let name = validated_name(name)?;
        if self.playlists.insert(name.to_string(), entries).is_some() {
            log::info!("Overwrote playlist '{}'", name);
        } else {
            log::info!("Created playlist '{}'", name);
        }
        Ok(())
    }

    pub fn add_entries(&mut self, playlist: &str, monitor_name: &str, refs: &[ContentRef]) -> Result<AddOutcome> {
        let entries = self.entries_mut(playlist)?;
        let mut list = Playlist::new(playlist, std::mem::take(entries));
        let added = list.add_entries(monitor_name, refs);
        *entries = list.entries;

        Ok(AddOutcome {
            added,
            requested: refs.len(),
        })
    }

    /// Removing nothing is rejected rather than treated as a no-op.
    pub fn remove_entries(&mut self, playlist: &str, monitor_name: &str, refs: &[ContentRef]) -> Result<usize> {
        require_selection(refs, "remove")?;
        let entries = self.entries_mut(playlist)?;
        let mut list = Playlist::new(playlist, std::mem::take(entries));
        let removed = list.remove_entries(monitor_name, refs);
        *entries = list.entries;
        Ok(removed)
    }

    pub fn move_entries(
        &mut self,
        playlist: &str,
        monitor_name: &str,
        indices: &[usize],
        direction: Direction,
    ) -> Result<()> {
        require_selection(indices, "move")?;
        let entries = self.entries_mut(playlist)?;
        let mut list = Playlist::new(playlist, std::mem::take(entries));
        list.move_entries(monitor_name, indices, direction);
        *entries = list.entries;
        Ok(())
    }

    /// Renames a playlist, replacing any playlist already called `new_name`.
    pub fn rename(&mut self, old_name: &str, new_name: &str) -> Result<()> {
        let new_name = validated_name(new_name)?;
        let entries = self.playlists.remove(old_name).ok_or_else(|| NotFoundError::Playlist {
            name: old_name.to_string(),
        })?;
        self.playlists.insert(new_name.to_string(), entries);

        if self.active_playlist.as_deref() == Some(old_name) {
            self.active_playlist = Some(new_name.to_string());
        }
        Ok(())
    }

    pub fn delete(&mut self, name: &str) -> Result<()> {
        self.playlists.remove(name).ok_or_else(|| NotFoundError::Playlist {
            name: name.to_string(),
        })?;
        if self.active_playlist.as_deref() == Some(name) {
            self.active_playlist = None;
        }
        Ok(())
    }

    /// Selects the active playlist. Unknown names leave the selection as it was.
    pub fn activate(&mut self, name: &str) -> Result<()> {
        if !self.playlists.contains_key(name) {
            return Err(LumenError::NotFound(NotFoundError::Playlist {
                name: name.to_string(),
            }));
        }
        self.active_playlist = Some(name.to_string());
        Ok(())
    }

    /// Restores the selection read from configuration. A name that no longer
    /// keys a playlist is dropped with a warning.
    pub fn restore_active(&mut self, name: Option<&str>) {
        self.active_playlist = match name {
            Some(name) if self.playlists.contains_key(name) => Some(name.to_string()),
            Some(name) => {
                log::warn!("Active playlist '{}' is not in the playlist store", name);
                None
            }
            None => None,
        };
    }

    fn entries_mut(&mut self, name: &str) -> Result<&mut PlaylistEntries> {
        self.playlists.get_mut(name).ok_or_else(|| {
            LumenError::NotFound(NotFoundError::Playlist {
                name: name.to_string(),
            })
        })
    }
}

fn require_selection<T>(selection: &[T], operation: &str) -> Result<()> {
    if selection.is_empty() {
        return Err(ValidationError::EmptySelection {
            operation: operation.to_string(),
        }
        .into());
    }
    Ok(())
}

fn validated_name(name: &str) -> Result<&str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        Err(LumenError::Validation(ValidationError::EmptyPlaylistName))
    } else {
        Ok(trimmed)
    }
}
