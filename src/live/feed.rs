use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, Utc, Weekday};
use serde::Deserialize;
use tracing::debug;

use crate::model::{Candidate, FeatureSnapshot, MarketOdds, Profile};

/// How long before kickoff the evaluation window closes. Must sit inside
/// the latest recompute offset or the final recompute never fires.
const CUTOFF_BEFORE_KICKOFF_MINS: i64 = 15;

const TOP5_LEAGUES: [&str; 5] = [
    "premier-league",
    "la-liga",
    "bundesliga",
    "serie-a",
    "ligue-1",
];

/// Trait every upcoming-match source must implement.
#[async_trait]
pub trait CandidateFeed: Send + Sync {
    /// Return all upcoming target-profile candidates.
    async fn fetch_upcoming(&self) -> Result<Vec<Candidate>>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}

/// Raw event shape returned by the events API.
#[derive(Debug, Deserialize)]
struct ApiEvent {
    id: String,
    home_team: String,
    away_team: String,
    league: String,
    start_time: DateTime<Utc>,
    #[serde(default)]
    lineup_confirmed: Option<bool>,
    #[serde(default)]
    market_drift_1h: Option<f64>,
    opening_over_odds: f64,
    opening_under_odds: f64,
    #[serde(default)]
    closing_over_odds: Option<f64>,
    #[serde(default)]
    closing_under_odds: Option<f64>,
}

/// HTTP feed over the events API. Non-target fixtures (neither a weekend
/// top-5 match nor a continental cup tie) are dropped at the feed edge.
pub struct HttpCandidateFeed {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCandidateFeed {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(HttpCandidateFeed {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl CandidateFeed for HttpCandidateFeed {
    async fn fetch_upcoming(&self) -> Result<Vec<Candidate>> {
        let url = format!("{}/mvp/events/football", self.base_url);
        let events: Vec<ApiEvent> = self
            .client
            .get(&url)
            .query(&[
                ("leagues", "premier-league,la-liga,bundesliga,serie-a,ligue-1,ucl"),
                ("days_ahead", "2"),
            ])
            .send()
            .await
            .context("events API request failed")?
            .error_for_status()
            .context("events API returned error status")?
            .json()
            .await
            .context("failed to decode events API response")?;

        let candidates: Vec<Candidate> = events.into_iter().filter_map(parse_event).collect();
        debug!("Feed returned {} target candidates", candidates.len());
        Ok(candidates)
    }

    fn name(&self) -> &str {
        "events-api"
    }
}

/// Derive the profile from league and weekday; `None` drops the event.
fn classify_profile(league: &str, start_time: DateTime<Utc>) -> Option<Profile> {
    if league == "ucl" {
        return Some(Profile::Continental);
    }
    let is_weekend = matches!(start_time.weekday(), Weekday::Sat | Weekday::Sun);
    if is_weekend && TOP5_LEAGUES.contains(&league) {
        return Some(Profile::WeekendTopFive);
    }
    None
}

fn parse_event(event: ApiEvent) -> Option<Candidate> {
    let profile = classify_profile(&event.league, event.start_time)?;
    Some(Candidate {
        match_id: event.id,
        home_team: event.home_team,
        away_team: event.away_team,
        league: event.league,
        profile,
        start_time: event.start_time,
        cutoff_time: event.start_time - Duration::minutes(CUTOFF_BEFORE_KICKOFF_MINS),
        features: FeatureSnapshot {
            lineup_confirmed: event.lineup_confirmed,
            market_drift_1h: event.market_drift_1h,
        },
        over_odds: MarketOdds {
            opening: event.opening_over_odds,
            closing: event.closing_over_odds,
        },
        under_odds: MarketOdds {
            opening: event.opening_under_odds,
            closing: event.closing_under_odds,
        },
        goals_total: None,
    })
}
