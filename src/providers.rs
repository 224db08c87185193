use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::info;

use crate::model::{Candidate, OutcomeVariant, ProbabilityEstimate, Profile};

/// Failure modes of a probability provider.
///
/// `NoModel` is an explicit signal; the provider never silently defaults
/// to 0.5. The harnesses treat both miss variants as a safe reject.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("no model scored ({profile}, {variant})")]
    NoModel {
        profile: Profile,
        variant: OutcomeVariant,
    },
    #[error("no estimate available for match {match_id} ({variant})")]
    NoEstimate {
        match_id: String,
        variant: OutcomeVariant,
    },
    #[error("upstream provider failure: {0}")]
    Upstream(#[from] anyhow::Error),
}

/// Trait every calibrated-probability source must implement.
///
/// Implementations own whatever modelling machinery they like (the
/// production ensemble lives behind this seam); the engine only ever sees
/// one probability per (candidate, variant).
#[async_trait]
pub trait ProbabilityProvider: Send + Sync {
    async fn estimate(
        &self,
        candidate: &Candidate,
        variant: OutcomeVariant,
    ) -> Result<ProbabilityEstimate, ProviderError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}

/// Provider backed by a pre-computed estimate table.
///
/// The offline scoring job writes one row per (match, variant) it scored;
/// estimates carry the `trained_before` stamp of the model fold that
/// produced them. A lookup miss is typed: `NoModel` when the scoring job
/// never covered the (profile, variant) at all, `NoEstimate` when the
/// model exists but skipped this match.
#[derive(Default)]
pub struct TableProvider {
    estimates: HashMap<(String, OutcomeVariant), ProbabilityEstimate>,
    covered: HashSet<(Profile, OutcomeVariant)>,
}

impl TableProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        match_id: &str,
        profile: Profile,
        variant: OutcomeVariant,
        estimate: ProbabilityEstimate,
    ) {
        self.estimates
            .insert((match_id.to_string(), variant), estimate);
        self.covered.insert((profile, variant));
    }

    pub fn get(&self, match_id: &str, variant: OutcomeVariant) -> Option<ProbabilityEstimate> {
        self.estimates
            .get(&(match_id.to_string(), variant))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.estimates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.estimates.is_empty()
    }
}

#[async_trait]
impl ProbabilityProvider for TableProvider {
    async fn estimate(
        &self,
        candidate: &Candidate,
        variant: OutcomeVariant,
    ) -> Result<ProbabilityEstimate, ProviderError> {
        if let Some(estimate) = self.get(&candidate.match_id, variant) {
            return Ok(estimate);
        }
        if self.covered.contains(&(candidate.profile, variant)) {
            Err(ProviderError::NoEstimate {
                match_id: candidate.match_id.clone(),
                variant,
            })
        } else {
            Err(ProviderError::NoModel {
                profile: candidate.profile,
                variant,
            })
        }
    }

    fn name(&self) -> &str {
        "estimate-table"
    }
}

/// One row of the estimates file written by the offline scoring job.
#[derive(Debug, Deserialize)]
struct EstimateRecord {
    match_id: String,
    profile: Profile,
    variant: OutcomeVariant,
    probability: f64,
    trained_before: DateTime<Utc>,
}

/// Load a JSON estimates file into a `TableProvider`.
pub fn load_estimates(path: &Path) -> Result<TableProvider> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read estimates file {}", path.display()))?;
    let records: Vec<EstimateRecord> =
        serde_json::from_str(&raw).context("failed to decode estimates file")?;
    let mut provider = TableProvider::new();
    for record in &records {
        provider.insert(
            &record.match_id,
            record.profile,
            record.variant,
            ProbabilityEstimate {
                probability: record.probability,
                trained_before: record.trained_before,
            },
        );
    }
    info!(
        "Loaded {} estimate(s) from {}",
        provider.len(),
        path.display()
    );
    Ok(provider)
}
