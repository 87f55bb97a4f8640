//! Best-effort telemetry mirror (Ubidots device API).

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::config::TelemetryConfig;

/// Auth header expected by the Ubidots REST API.
const AUTH_HEADER: &str = "X-Auth-Token";

/// Errors from telemetry forwarding. Callers log these and move on.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("telemetry not configured: {0}")]
    Config(String),
}

/// Somewhere to mirror key/value readings.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    /// Send a JSON object of readings.
    async fn send(&self, values: Value) -> Result<(), TelemetryError>;
}

/// Posts readings to `<base_url>/<device_label>`.
#[derive(Debug, Clone)]
pub struct UbidotsSink {
    client: reqwest::Client,
    url: String,
    token: String,
}

impl UbidotsSink {
    pub fn new(
        base_url: &str,
        device_label: &str,
        token: &str,
        timeout: Duration,
    ) -> Result<Self, TelemetryError> {
        if device_label.is_empty() || token.is_empty() {
            return Err(TelemetryError::Config(
                "device label and token are required".to_string(),
            ));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: format!("{}/{}", base_url.trim_end_matches('/'), device_label),
            token: token.to_string(),
        })
    }

    /// `None` when the config leaves the mirror disabled.
    pub fn from_config(config: &TelemetryConfig) -> Result<Option<Self>, TelemetryError> {
        match (&config.device_label, &config.token) {
            (Some(label), Some(token)) if config.is_enabled() => Ok(Some(Self::new(
                &config.base_url,
                label,
                token,
                Duration::from_secs(config.timeout_secs.max(1)),
            )?)),
            _ => Ok(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TelemetrySink for UbidotsSink {
    async fn send(&self, values: Value) -> Result<(), TelemetryError> {
        let response = self
            .client
            .post(&self.url)
            .header(AUTH_HEADER, &self.token)
            .json(&values)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TelemetryError::Api {
                status: status.as_u16(),
                message,
            });
        }

        log::info!("Telemetry sent to {}: {}", self.url, values);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_label() {
        let sink = UbidotsSink::new(
            "https://industrial.api.ubidots.com/api/v1.6/devices/",
            "sawah1",
            "BBFF-token",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            sink.url(),
            "https://industrial.api.ubidots.com/api/v1.6/devices/sawah1"
        );
    }

    #[test]
    fn test_new_requires_token() {
        let err = UbidotsSink::new("http://x", "sawah1", "", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, TelemetryError::Config(_)));
    }

    #[test]
    fn test_from_config_disabled_without_credentials() {
        let config = TelemetryConfig::default();
        assert!(UbidotsSink::from_config(&config).unwrap().is_none());

        let config = TelemetryConfig {
            token: Some("BBFF-token".into()),
            device_label: Some("sawah1".into()),
            ..Default::default()
        };
        assert!(UbidotsSink::from_config(&config).unwrap().is_some());
    }
}
