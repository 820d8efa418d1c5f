use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use serde::{Serialize, Deserialize};
use crate::error::{ConfigError, LumenError};
use crate::Result;

/// Key in the source binding that every unnamed monitor falls back to.
pub const DEFAULT_SOURCE_KEY: &str = "Default";

/// A local file path, web URL, local HTML path or stream URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentRef(String);

impl ContentRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    pub fn is_remote(&self) -> bool {
        self.0.starts_with("http://") || self.0.starts_with("https://")
    }

    /// Normalizes the reference into something a player can open.
    ///
    /// URLs pass through untouched. Anything else is a filesystem path and
    /// becomes an absolute `file://` URI.
    pub fn to_uri(&self) -> String {
        if self.is_remote() || self.0.starts_with("file://") {
            return self.0.clone();
        }

        let path = Path::new(&self.0);
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(path))
                .unwrap_or_else(|_| path.to_path_buf())
        };
        let absolute = absolute.canonicalize().unwrap_or(absolute);

        format!("file://{}", absolute.to_string_lossy())
    }

    /// Filesystem path for local references, `None` for URLs.
    pub fn local_path(&self) -> Option<PathBuf> {
        if self.is_remote() {
            None
        } else if let Some(stripped) = self.0.strip_prefix("file://") {
            Some(PathBuf::from(stripped))
        } else {
            Some(PathBuf::from(&self.0))
        }
    }
}

impl fmt::Display for ContentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContentRef {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ContentRef {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&Path> for ContentRef {
    fn from(value: &Path) -> Self {
        Self(value.to_string_lossy().to_string())
    }
}

/// Monitor name to content mapping persisted under `data_source`.
///
/// Must always contain [`DEFAULT_SOURCE_KEY`]. The map is deserialized as-is
/// so a file that lost its `Default` entry is caught by [`SourceBinding::validate`]
/// instead of being repaired with a guessed value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceBinding(BTreeMap<String, ContentRef>);

impl SourceBinding {
    pub fn new(default: ContentRef) -> Self {
        let mut sources = BTreeMap::new();
        sources.insert(DEFAULT_SOURCE_KEY.to_string(), default);
        Self(sources)
    }

    pub fn validate(&self) -> Result<()> {
        if self.0.contains_key(DEFAULT_SOURCE_KEY) {
            Ok(())
        } else {
            Err(LumenError::Config(ConfigError::MissingDefault))
        }
    }

    /// Explicit entry for a monitor, without falling back to `Default`.
    pub fn get(&self, monitor_name: &str) -> Option<&ContentRef> {
        self.0.get(monitor_name)
    }

    pub fn default_source(&self) -> Option<&ContentRef> {
        self.0.get(DEFAULT_SOURCE_KEY)
    }

    pub fn set(&mut self, monitor_name: impl Into<String>, content: ContentRef) {
        self.0.insert(monitor_name.into(), content);
    }

    pub fn set_default(&mut self, content: ContentRef) {
        self.set(DEFAULT_SOURCE_KEY, content);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ContentRef)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for SourceBinding {
    fn default() -> Self {
        Self::new(ContentRef::new(""))
    }
}

impl FromIterator<(String, ContentRef)> for SourceBinding {
    fn from_iter<I: IntoIterator<Item = (String, ContentRef)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_pass_through() {
        assert_eq!(ContentRef::new("https://example.com").to_uri(), "https://example.com");
        assert_eq!(ContentRef::new("http://example.com/a").to_uri(), "http://example.com/a");
        assert_eq!(ContentRef::new("file:///tmp/a.html").to_uri(), "file:///tmp/a.html");
    }

    #[test]
    fn test_paths_become_file_uris() {
        let uri = ContentRef::new("/definitely/not/here/a.mp4").to_uri();
        assert_eq!(uri, "file:///definitely/not/here/a.mp4");

        let relative = ContentRef::new("clip.mp4").to_uri();
        assert!(relative.starts_with("file:///"));
        assert!(relative.ends_with("/clip.mp4"));
    }

    #[test]
    fn test_local_path() {
        assert_eq!(ContentRef::new("https://x.y").local_path(), None);
        assert_eq!(
            ContentRef::new("file:///tmp/a.html").local_path(),
            Some(PathBuf::from("/tmp/a.html"))
        );
    }

    #[test]
    fn test_binding_requires_default() {
        let binding: SourceBinding = [("HDMI-1".to_string(), ContentRef::new("b.mp4"))]
            .into_iter()
            .collect();

        match binding.validate() {
            Err(LumenError::Config(ConfigError::MissingDefault)) => {}
            other => panic!("Expected MissingDefault, got {:?}", other),
        }

        assert!(SourceBinding::new("a.mp4".into()).validate().is_ok());
    }

    #[test]
    fn test_binding_deserializes_from_plain_map() {
        let binding: SourceBinding =
            serde_json::from_str(r#"{"Default": "a.mp4", "HDMI-1": "b.mp4"}"#).unwrap();
        assert_eq!(binding.default_source(), Some(&ContentRef::new("a.mp4")));
        assert_eq!(binding.get("HDMI-1"), Some(&ContentRef::new("b.mp4")));
        assert_eq!(binding.get("DP-1"), None);
    }
}
