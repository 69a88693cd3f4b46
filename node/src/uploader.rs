use crate::errors::{Error, Result};
use crate::telemetry::EncodedRecord;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

/// Posts encoded records to the collector. One attempt per call.
pub struct Uploader {
    http: reqwest::Client,
    url: String,
}

impl Uploader {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// The caller checks the link first. Non-2xx answers are errors; the
    /// response body is only logged.
    pub async fn upload(&self, payload: &EncodedRecord) -> Result<StatusCode> {
        let response = self
            .http
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(payload.as_str().to_owned())
            .send()
            .await?;

        let status = response.status();
        match response.text().await {
            Ok(body) => debug!("Collector answered {}: {}", status, body),
            Err(e) => debug!("Collector answered {} with unreadable body: {}", status, e),
        }

        if status.is_success() {
            Ok(status)
        } else {
            Err(Error::TransportStatus(status.as_u16()))
        }
    }
}
