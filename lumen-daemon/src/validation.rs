//! Reachability checks run before a web page or stream replaces what is playing.

use std::future::Future;
use std::time::Duration;
use lumen_common::{
    error::{ExternalUnavailable, ValidationError},
    ContentRef, LumenError, Mode, Result,
};

/// A source change waiting for its network check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSource {
    pub mode: Mode,
    pub content: ContentRef,
}

impl PendingSource {
    pub fn new(mode: Mode, content: ContentRef) -> Self {
        Self { mode, content }
    }

    fn failure(&self, message: impl Into<String>) -> LumenError {
        let url = self.content.to_string();
        let message = message.into();
        match self.mode {
            Mode::Stream => LumenError::External(ExternalUnavailable::Stream { url, message }),
            _ => LumenError::External(ExternalUnavailable::Webpage { url, message }),
        }
    }
}

pub struct Validator {
    client: reqwest::Client,
    timeout: Duration,
}

impl Validator {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("lumen/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|e| {
                log::warn!("Falling back to default HTTP client: {}", e);
                reqwest::Client::new()
            });
        Self { client, timeout }
    }

    pub async fn validate(&self, pending: &PendingSource) -> Result<()> {
        match pending.mode {
            Mode::Webpage => bounded(pending, self.timeout, self.check_webpage(pending)).await,
            Mode::Stream => bounded(pending, self.timeout, check_stream(pending)).await,
            Mode::Video | Mode::Playlist => Ok(()),
        }
    }

    async fn check_webpage(&self, pending: &PendingSource) -> Result<()> {
        // Local HTML needs no network round trip
        if let Some(path) = pending.content.local_path() {
            return if path.exists() {
                Ok(())
            } else {
                Err(ValidationError::MissingFile { path }.into())
            };
        }

        let response = self
            .client
            .get(pending.content.as_str())
            .send()
            .await
            .map_err(|e| pending.failure(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            return Err(pending.failure(format!("HTTP {}", status)));
        }

        log::debug!("{} answered {}", pending.content, status);
        Ok(())
    }
}

/// Asks yt-dlp whether the URL resolves to a playable stream, without downloading.
async fn check_stream(pending: &PendingSource) -> Result<()> {
    let ytdlp = which::which("yt-dlp").map_err(|_| {
        LumenError::External(ExternalUnavailable::ToolMissing {
            tool: "yt-dlp".to_string(),
        })
    })?;

    let output = tokio::process::Command::new(ytdlp)
        .args(["--simulate", "--no-playlist", "--quiet", "--no-warnings"])
        .arg(pending.content.as_str())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| pending.failure(e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let reason = stderr.lines().last().unwrap_or("extraction failed").trim().to_string();
        return Err(pending.failure(reason));
    }

    Ok(())
}

async fn bounded<F>(pending: &PendingSource, timeout: Duration, check: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    tokio::time::timeout(timeout, check)
        .await
        .map_err(|_| pending.failure(format!("no answer within {:?}", timeout)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_local_html_skips_network() {
        let dir = tempdir().unwrap();
        let page = dir.path().join("index.html");
        std::fs::write(&page, "<html></html>").unwrap();

        let validator = Validator::new(Duration::from_secs(1));
        let pending = PendingSource::new(Mode::Webpage, page.as_path().into());
        assert!(validator.validate(&pending).await.is_ok());

        let file_uri = PendingSource::new(Mode::Webpage, format!("file://{}", page.display()).into());
        assert!(validator.validate(&file_uri).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_local_html() {
        let dir = tempdir().unwrap();
        let validator = Validator::new(Duration::from_secs(1));
        let pending = PendingSource::new(Mode::Webpage, dir.path().join("gone.html").as_path().into());

        assert!(matches!(
            validator.validate(&pending).await,
            Err(LumenError::Validation(ValidationError::MissingFile { .. }))
        ));
    }

    #[tokio::test]
    async fn test_timeout_reports_external_failure() {
        let pending = PendingSource::new(Mode::Stream, "https://example.com/live".into());
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        };

        match bounded(&pending, Duration::from_millis(20), slow).await {
            Err(LumenError::External(ExternalUnavailable::Stream { url, message })) => {
                assert_eq!(url, "https://example.com/live");
                assert!(message.contains("no answer"));
            }
            other => panic!("Expected a stream failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_video_sources_need_no_check() {
        let validator = Validator::new(Duration::from_secs(1));
        let pending = PendingSource::new(Mode::Video, "/does/not/matter.mp4".into());
        assert!(validator.validate(&pending).await.is_ok());
    }
}
