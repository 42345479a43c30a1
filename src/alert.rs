//! Operator alerting
//!
//! Every alert is logged at `error!`. With `alerts.webhook_url` set it is also
//! POSTed as JSON. Delivery failures are logged and swallowed.

use crate::config::AlertsConfig;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::{error, warn};

/// What went wrong
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// A chain loop or the order pool stopped
    LoopHalted,
    /// An order ended with one leg redeemed and the other refunded
    FailedHard,
}

#[derive(Debug, Serialize)]
struct AlertPayload<'a> {
    instance: &'a str,
    kind: AlertKind,
    subject: &'a str,
    message: &'a str,
    timestamp: DateTime<Utc>,
}

pub struct Alerter {
    instance_id: String,
    webhook_url: Option<String>,
    http: reqwest::Client,
}

impl Alerter {
    pub fn new(instance_id: impl Into<String>, config: &AlertsConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            instance_id: instance_id.into(),
            webhook_url: config.webhook_url.clone(),
            http,
        }
    }

    /// Log-only alerter
    pub fn disabled() -> Self {
        Self::new("local", &AlertsConfig::default())
    }

    pub async fn alert(&self, kind: AlertKind, subject: &str, message: &str) {
        error!(alert = ?kind, "ALERT [{}] {}: {}", self.instance_id, subject, message);

        let url = match &self.webhook_url {
            Some(url) => url,
            None => return,
        };
        let payload = AlertPayload {
            instance: &self.instance_id,
            kind,
            subject,
            message,
            timestamp: Utc::now(),
        };

        let delivered = self
            .http
            .post(url)
            .json(&payload)
            .send()
            .await
            .and_then(|r| r.error_for_status());
        if let Err(e) = delivered {
            warn!("Failed to deliver {:?} alert for {}: {}", kind, subject, e);
        }
    }
}
