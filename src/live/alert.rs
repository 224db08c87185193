use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{OutcomeVariant, Profile, Selection};

/// Structured payload handed to the alert transport. Delivery mechanics
/// (Slack, Telegram, ...) live behind the webhook.
#[derive(Debug, Clone, Serialize)]
pub struct AlertPayload {
    pub match_id: String,
    pub home_team: String,
    pub away_team: String,
    pub league: String,
    pub profile: Profile,
    pub variant: OutcomeVariant,
    pub bucket: &'static str,
    pub confidence: f64,
    pub edge: f64,
    pub clv: Option<f64>,
    pub odds: f64,
    pub stake_fraction: f64,
    pub stake_amount: f64,
    pub cutoff_time: DateTime<Utc>,
    /// Human-readable summary, rendered once at dispatch time
    pub text: String,
}

impl AlertPayload {
    pub fn from_selection(selection: &Selection) -> Self {
        let text = format!(
            "Qualified selection ({} confidence): {} vs {} — {} @ {:.2}, \
             confidence {:.1}%, edge {:.1}%, stake {:.1}% (${:.2}), cutoff {}",
            selection.bucket().label(),
            selection.home_team,
            selection.away_team,
            selection.variant,
            selection.odds,
            selection.confidence * 100.0,
            selection.edge * 100.0,
            selection.stake_fraction * 100.0,
            selection.stake_amount,
            selection.cutoff_time.format("%H:%M"),
        );
        AlertPayload {
            match_id: selection.match_id.clone(),
            home_team: selection.home_team.clone(),
            away_team: selection.away_team.clone(),
            league: selection.league.clone(),
            profile: selection.profile,
            variant: selection.variant,
            bucket: selection.bucket().label(),
            confidence: selection.confidence,
            edge: selection.edge,
            clv: selection.clv,
            odds: selection.odds,
            stake_fraction: selection.stake_fraction,
            stake_amount: selection.stake_amount,
            cutoff_time: selection.cutoff_time,
            text,
        }
    }
}

/// Trait every alert transport must implement.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn dispatch(&self, payload: &AlertPayload) -> Result<()>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}

/// Posts alert payloads as JSON to an HTTP webhook.
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(WebhookSink {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    async fn dispatch(&self, payload: &AlertPayload) -> Result<()> {
        let response = self.client.post(&self.url).json(payload).send().await?;
        if !response.status().is_success() {
            bail!("webhook returned status {}", response.status());
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_renders_bucket_and_summary() {
        let selection = Selection {
            match_id: "m1".into(),
            home_team: "Milan".into(),
            away_team: "Porto".into(),
            league: "ucl".into(),
            profile: Profile::Continental,
            variant: OutcomeVariant::Over,
            confidence: 0.82,
            edge: 0.07,
            clv: Some(0.03),
            odds: 2.05,
            stake_fraction: 0.02,
            stake_amount: 200.0,
            created_at: Utc::now(),
            cutoff_time: Utc::now(),
        };
        let payload = AlertPayload::from_selection(&selection);
        assert_eq!(payload.bucket, "80%+");
        assert!(payload.text.contains("Milan vs Porto"));
        assert!(payload.text.contains("over"));
    }
}
