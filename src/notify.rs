//! Notification sinks used when the alert gate fires.
//!
//! Dispatch is fire-and-forget: the gate logs a [`DispatchError`] and moves
//! on without retrying.

use std::sync::{Arc, Mutex};

/// A notification could not be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The sink refused or could not reach its destination
    Unavailable(String),
    /// The destination answered with an error
    Rejected { status: u16, message: String },
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchError::Unavailable(msg) => write!(f, "Notification sink unavailable: {msg}"),
            DispatchError::Rejected { status, message } => {
                write!(f, "Notification rejected ({status}): {message}")
            }
        }
    }
}

impl std::error::Error for DispatchError {}

/// Destination for alert notifications.
pub trait Notifier: Send {
    fn notify(&self, title: &str, body: &str) -> Result<(), DispatchError>;
}

/// Prints alerts to the terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, title: &str, body: &str) -> Result<(), DispatchError> {
        println!("\x07[ALERT] {title} {body}");
        tracing::info!(title, body, "alert dispatched");
        Ok(())
    }
}

/// A notification captured by [`MemoryNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    pub title: String,
    pub body: String,
}

/// Keeps dispatched notifications in memory; clones share the same log.
#[derive(Debug, Default, Clone)]
pub struct MemoryNotifier {
    sent: Arc<Mutex<Vec<SentNotification>>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications dispatched so far.
    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, title: &str, body: &str) -> Result<(), DispatchError> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SentNotification {
                title: title.to_string(),
                body: body.to_string(),
            });
        Ok(())
    }
}

#[cfg(feature = "webhook")]
pub use webhook::{WebhookConfig, WebhookNotifier};

#[cfg(feature = "webhook")]
mod webhook {
    use super::{DispatchError, Notifier};
    use chrono::Utc;
    use serde::Serialize;
    use std::time::Duration;

    /// Where and how to POST alerts.
    #[derive(Debug, Clone)]
    pub struct WebhookConfig {
        /// Full URL receiving the JSON payload
        pub url: String,
        /// Optional bearer token
        pub token: Option<String>,
        /// Request timeout
        pub timeout: Duration,
    }

    impl WebhookConfig {
        pub fn new(url: impl Into<String>) -> Self {
            Self {
                url: url.into(),
                token: None,
                timeout: Duration::from_secs(10),
            }
        }

        pub fn with_token(mut self, token: impl Into<String>) -> Self {
            self.token = Some(token.into());
            self
        }
    }

    #[derive(Debug, Serialize)]
    struct AlertPayload<'a> {
        title: &'a str,
        body: &'a str,
        device_id: &'a str,
        sent_at: String,
        source: &'static str,
        version: &'static str,
    }

    /// Blocking webhook notifier for use from the alert thread.
    pub struct WebhookNotifier {
        config: WebhookConfig,
        client: reqwest::Client,
        runtime: tokio::runtime::Runtime,
        device_id: String,
    }

    impl WebhookNotifier {
        pub fn new(config: WebhookConfig) -> Result<Self, DispatchError> {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| DispatchError::Unavailable(format!("Failed to create runtime: {e}")))?;

            let client = reqwest::Client::builder()
                .timeout(config.timeout)
                .build()
                .map_err(|e| DispatchError::Unavailable(format!("Failed to create HTTP client: {e}")))?;

            // Device ID from hostname + instance
            let hostname = hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string());
            let device_id = format!(
                "motion-{}-{}",
                hostname,
                &uuid::Uuid::new_v4().to_string()[..8]
            );

            Ok(Self {
                config,
                client,
                runtime,
                device_id,
            })
        }

        pub fn device_id(&self) -> &str {
            &self.device_id
        }

        async fn post(&self, title: &str, body: &str) -> Result<(), DispatchError> {
            let payload = AlertPayload {
                title,
                body,
                device_id: &self.device_id,
                sent_at: Utc::now().to_rfc3339(),
                source: "motion-alert-agent",
                version: env!("CARGO_PKG_VERSION"),
            };

            let mut request = self.client.post(&self.config.url).json(&payload);
            if let Some(ref token) = self.config.token {
                request = request.header("Authorization", format!("Bearer {token}"));
            }

            let response = request
                .send()
                .await
                .map_err(|e| DispatchError::Unavailable(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let message = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(DispatchError::Rejected {
                    status: status.as_u16(),
                    message,
                });
            }
            Ok(())
        }
    }

    impl Notifier for WebhookNotifier {
        fn notify(&self, title: &str, body: &str) -> Result<(), DispatchError> {
            self.runtime.block_on(self.post(title, body))
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_notifier_shares_log_between_clones() {
        let notifier = MemoryNotifier::new();
        let handle = notifier.clone();

        notifier.notify("Beware!", "You are crossing the road!").unwrap();
        assert_eq!(
            handle.sent(),
            vec![SentNotification {
                title: "Beware!".to_string(),
                body: "You are crossing the road!".to_string(),
            }]
        );
    }

    #[test]
    fn test_console_notifier_succeeds() {
        assert!(ConsoleNotifier.notify("title", "body").is_ok());
    }
}
