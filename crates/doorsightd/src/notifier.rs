//! Photo notification delivery through the Telegram Bot API.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("cannot attach photo {path}: {source}")]
    Photo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Never carries the request URL, which embeds the bot token.
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("rejected by Telegram (HTTP {status}): {description}")]
    Rejected { status: u16, description: String },
}

/// Delivers one photo with a caption to a fixed recipient.
pub trait Notifier {
    fn send_photo(&self, photo: &Path, caption: &str) -> Result<(), DispatchError>;
}

#[derive(Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// `sendPhoto` client for one bot and one chat.
pub struct TelegramNotifier {
    client: reqwest::blocking::Client,
    api_base: String,
    token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(api_base: &str, token: &str, chat_id: &str) -> Result<Self, DispatchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DispatchError::Transport(e.without_url()))?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
            chat_id: chat_id.to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendPhoto", self.api_base, self.token)
    }
}

impl Notifier for TelegramNotifier {
    fn send_photo(&self, photo: &Path, caption: &str) -> Result<(), DispatchError> {
        let form = reqwest::blocking::multipart::Form::new()
            .text("chat_id", self.chat_id.clone())
            .text("caption", caption.to_string())
            .file("photo", photo)
            .map_err(|source| DispatchError::Photo {
                path: photo.to_path_buf(),
                source,
            })?;

        let response = self
            .client
            .post(self.endpoint())
            .multipart(form)
            .send()
            .map_err(|e| DispatchError::Transport(e.without_url()))?;

        let status = response.status();
        let body = response.json::<ApiResponse>().ok();

        match body {
            Some(ApiResponse { ok: true, .. }) if status.is_success() => {
                tracing::debug!(chat_id = %self.chat_id, "telegram accepted photo");
                Ok(())
            }
            other => Err(DispatchError::Rejected {
                status: status.as_u16(),
                description: other
                    .and_then(|b| b.description)
                    .unwrap_or_else(|| "no description".to_string()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let notifier = TelegramNotifier::new("https://api.telegram.org/", "123:abc", "42").unwrap();
        assert_eq!(notifier.endpoint(), "https://api.telegram.org/bot123:abc/sendPhoto");
    }

    #[test]
    fn test_missing_photo_fails_before_sending() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = TelegramNotifier::new("http://127.0.0.1:9", "123:abc", "42").unwrap();
        let err = notifier
            .send_photo(&dir.path().join("missing.jpg"), "Alice is waiting outside.")
            .unwrap_err();
        assert!(matches!(err, DispatchError::Photo { .. }), "got {err}");
    }

    #[test]
    fn test_transport_error_hides_token() {
        let dir = tempfile::tempdir().unwrap();
        let photo = dir.path().join("detected.jpg");
        std::fs::write(&photo, b"jpeg").unwrap();

        // Nothing listens on the discard port locally.
        let notifier = TelegramNotifier::new("http://127.0.0.1:9", "123:secret-token", "42").unwrap();
        let err = notifier.send_photo(&photo, "caption").unwrap_err();

        assert!(matches!(err, DispatchError::Transport(_)), "got {err}");
        assert!(!err.to_string().contains("secret-token"), "token leaked: {err}");
    }
}
