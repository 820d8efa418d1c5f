use std::path::{Path, PathBuf};
use rand::seq::SliceRandom;
use walkdir::WalkDir;
use crate::error::{LumenError, NotFoundError};
use crate::Result;

const VIDEO_EXTENSIONS: [&str; 11] = [
    "mp4", "m4v", "webm", "mkv", "mov", "avi", "wmv", "flv", "ogv", "mpg", "mpeg",
];

pub struct MediaDiscovery;

impl MediaDiscovery {
    /// Default wallpaper directory, `~/Videos/Lumen`.
    pub fn default_video_dir() -> PathBuf {
        dirs::video_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join("Videos")))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Lumen")
    }

    /// Video files under `path`, recursively, sorted for stable listings.
    pub fn discover_videos(path: &Path) -> Result<Vec<PathBuf>> {
        if !path.is_dir() {
            return Err(LumenError::NotFound(NotFoundError::MediaDirectory {
                path: path.to_path_buf(),
            }));
        }

        let mut videos: Vec<PathBuf> = WalkDir::new(path)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|entry_path| Self::is_video(entry_path))
            .collect();

        if videos.is_empty() {
            return Err(LumenError::NotFound(NotFoundError::NoVideos {
                path: path.to_path_buf(),
            }));
        }

        videos.sort();
        log::debug!("Discovered {} videos in {:?}", videos.len(), path);
        Ok(videos)
    }

    pub fn is_video(path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
            .unwrap_or(false)
    }

    /// One random video from `path`, for the feeling-lucky command.
    pub fn pick_random(path: &Path) -> Result<PathBuf> {
        let videos = Self::discover_videos(path)?;
        let mut rng = rand::thread_rng();
        videos
            .choose(&mut rng)
            .cloned()
            .ok_or_else(|| LumenError::NotFound(NotFoundError::NoVideos { path: path.to_path_buf() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use std::fs;

    #[test]
    fn test_discover_videos_recursively() {
        let temp_dir = tempdir().unwrap();
        let test_dir = temp_dir.path();
        let subdir = test_dir.join("nature");
        fs::create_dir(&subdir).unwrap();

        fs::write(test_dir.join("ocean.mp4"), "fake").unwrap();
        fs::write(subdir.join("forest.WEBM"), "fake").unwrap();
        fs::write(test_dir.join("notes.txt"), "not a video").unwrap();
        fs::write(test_dir.join("cover.png"), "not a video").unwrap();

        let videos = MediaDiscovery::discover_videos(test_dir).unwrap();
        assert_eq!(videos.len(), 2);
        assert!(videos.iter().any(|p| p.file_name().unwrap() == "ocean.mp4"));
        assert!(videos.iter().any(|p| p.file_name().unwrap() == "forest.WEBM"));
    }

    #[test]
    fn test_empty_directory_has_no_videos() {
        let temp_dir = tempdir().unwrap();
        match MediaDiscovery::discover_videos(temp_dir.path()) {
            Err(LumenError::NotFound(NotFoundError::NoVideos { path })) => {
                assert_eq!(path, temp_dir.path());
            }
            other => panic!("Expected NoVideos, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_directory() {
        let result = MediaDiscovery::discover_videos(Path::new("/nonexistent/lumen/videos"));
        assert!(matches!(
            result,
            Err(LumenError::NotFound(NotFoundError::MediaDirectory { .. }))
        ));
    }

    #[test]
    fn test_pick_random_returns_a_discovered_video() {
        let temp_dir = tempdir().unwrap();
        for name in ["a.mp4", "b.mkv", "c.mov"] {
            fs::write(temp_dir.path().join(name), "fake").unwrap();
        }

        let videos = MediaDiscovery::discover_videos(temp_dir.path()).unwrap();
        for _ in 0..10 {
            let picked = MediaDiscovery::pick_random(temp_dir.path()).unwrap();
            assert!(videos.contains(&picked));
        }
    }

    #[test]
    fn test_default_dir_ends_with_lumen() {
        assert!(MediaDiscovery::default_video_dir().ends_with("Lumen"));
    }
}
