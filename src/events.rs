use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};

use crate::error::PublishError;
use crate::types::CompletionEvent;

/// Header carrying the topic access key.
const TOPIC_KEY_HEADER: &str = "aeg-sas-key";

/// Event bus client. Enables recording doubles in cycle tests.
pub trait EventPublisher: Send + Sync {
    fn publish(
        &self,
        event: &CompletionEvent,
    ) -> impl Future<Output = Result<(), PublishError>> + Send;
}

/// Publishes events to an HTTP event topic as a single-element JSON array.
pub struct HttpEventPublisher {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpEventPublisher {
    pub fn new(endpoint: &str, key: Option<&str>, timeout: Duration) -> Result<Self, String> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = key {
            let mut value = HeaderValue::from_str(key.trim())
                .map_err(|e| format!("Invalid event topic key: {}", e))?;
            value.set_sensitive(true);
            headers.insert(TOPIC_KEY_HEADER, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| format!("Failed to build event HTTP client: {}", e))?;

        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
        })
    }
}

impl EventPublisher for HttpEventPublisher {
    async fn publish(&self, event: &CompletionEvent) -> Result<(), PublishError> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&[event])
            .send()
            .await
            .map_err(PublishError::Transport)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(PublishError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

/// Recording publisher for cycle tests.
///
/// Captures every published event; can be switched to fail all publishes.
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<CompletionEvent>>,
    failing: AtomicBool,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let publisher = Self::default();
        publisher.failing.store(true, Ordering::Relaxed);
        publisher
    }

    pub fn events(&self) -> Vec<CompletionEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &CompletionEvent) -> Result<(), PublishError> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(PublishError::Other("event bus unavailable".to_string()));
        }
        self.events
            .lock()
            .map_err(|_| PublishError::Other("recording lock poisoned".to_string()))?
            .push(event.clone());
        Ok(())
    }
}
