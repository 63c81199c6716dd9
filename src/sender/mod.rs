use std::{future::Future, time::Duration};

use derive_new::new;
use log::{debug, error, warn};
use reqwest::{StatusCode, header::CONTENT_TYPE};
use serde::Serialize;
use thiserror::Error;

use crate::forwarder::ForwarderSettings;

/// Body of one upload request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogGroupList {
    pub log_group_list: Vec<LogGroup>,
}

/// Named group holding one record per shipped entry
#[derive(Debug, Clone, PartialEq, Serialize, new)]
pub struct LogGroup {
    pub source: String,
    pub logs: Vec<LogRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, new)]
pub struct LogRecord {
    /// Seconds since the Unix epoch
    pub time: i64,
    pub contents: Vec<LogContent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, new)]
pub struct LogContent {
    pub key: String,
    pub value: String,
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to encode log group: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("log service answered {status}: {body}")]
    Rejected { status: StatusCode, body: String },
}

impl SinkError {
    fn is_retryable(&self) -> bool {
        match self {
            SinkError::Serialize(_) => false,
            SinkError::Http(_) => true,
            SinkError::Rejected { status, .. } => {
                !status.is_client_error()
                    || *status == StatusCode::TOO_MANY_REQUESTS
                    || *status == StatusCode::REQUEST_TIMEOUT
            }
        }
    }
}

/// Destination of flushed batches
pub trait LogSink: Send + Sync + 'static {
    fn send(
        &self,
        topic_id: &str,
        group: LogGroup,
    ) -> impl Future<Output = Result<(), SinkError>> + Send;
}

/// Uploads log groups to the CLS structured log endpoint over HTTP
#[derive(Debug, Clone)]
pub struct HttpLogSender {
    client: reqwest::Client,
    url: String,
    retry_count: u32,
    timeout: Duration,
}

impl HttpLogSender {
    pub fn new(endpoint: &str, retry_count: u32, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("{}/structuredlog", normalize_endpoint(endpoint)),
            retry_count,
            timeout,
        }
    }

    pub fn from_settings(settings: &ForwarderSettings) -> Self {
        Self::new(
            &settings.endpoint,
            settings.retry_count,
            settings.request_timeout,
        )
    }

    async fn attempt(&self, topic_id: &str, payload: &[u8]) -> Result<(), SinkError> {
        let response = self
            .client
            .post(&self.url)
            .query(&[("topic_id", topic_id)])
            .header(CONTENT_TYPE, "application/json")
            .timeout(self.timeout)
            .body(payload.to_vec())
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(SinkError::Rejected { status, body })
    }
}

impl LogSink for HttpLogSender {
    fn send(
        &self,
        topic_id: &str,
        group: LogGroup,
    ) -> impl Future<Output = Result<(), SinkError>> + Send {
        async move {
            let payload = serde_json::to_vec(&LogGroupList {
                log_group_list: vec![group],
            })?;

            let mut attempts = 0;
            loop {
                attempts += 1;
                match self.attempt(topic_id, &payload).await {
                    Ok(()) => {
                        debug!("{} bytes delivered to topic {}", payload.len(), topic_id);
                        return Ok(());
                    }
                    Err(err) if !err.is_retryable() => {
                        error!("Log service refused batch for topic {}: {}", topic_id, err);
                        return Err(err);
                    }
                    Err(err) if attempts > self.retry_count => {
                        error!("Giving up on batch after {} attempts: {}", attempts, err);
                        return Err(err);
                    }
                    Err(err) => warn!("Attempt {} to deliver batch failed: {}", attempts, err),
                }
            }
        }
    }
}

fn normalize_endpoint(endpoint: &str) -> String {
    let endpoint = endpoint.trim().trim_end_matches('/');
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_owned()
    } else {
        format!("https://{endpoint}")
    }
}

#[cfg(test)]
mod sender_tests {
    use serde_json::json;

    use crate::sender::*;

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(
            normalize_endpoint("ap-guangzhou.cls.tencentcs.com"),
            "https://ap-guangzhou.cls.tencentcs.com"
        );
        assert_eq!(
            normalize_endpoint("http://127.0.0.1:8080/"),
            "http://127.0.0.1:8080"
        );
    }

    #[test]
    fn test_wire_shape() {
        let group = LogGroup::new(
            "127.0.0.1".to_owned(),
            vec![LogRecord::new(
                42,
                vec![LogContent::new("level".to_owned(), "info".to_owned())],
            )],
        );
        let body = serde_json::to_value(LogGroupList {
            log_group_list: vec![group],
        })
        .unwrap();

        assert_eq!(
            body,
            json!({
                "logGroupList": [{
                    "source": "127.0.0.1",
                    "logs": [{"time": 42, "contents": [{"key": "level", "value": "info"}]}]
                }]
            })
        );
    }

    #[test]
    fn test_client_errors_are_final() {
        let rejected = SinkError::Rejected {
            status: StatusCode::BAD_REQUEST,
            body: String::new(),
        };
        let unavailable = SinkError::Rejected {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: String::new(),
        };
        assert!(!rejected.is_retryable());
        assert!(unavailable.is_retryable());
    }

    #[test]
    fn test_throttling_is_retried() {
        for status in [StatusCode::TOO_MANY_REQUESTS, StatusCode::REQUEST_TIMEOUT] {
            let throttled = SinkError::Rejected {
                status,
                body: String::new(),
            };
            assert!(throttled.is_retryable(), "{status} should be retried");
        }
    }
}
