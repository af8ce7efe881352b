//! Estimate records - the per-precinct state mirrored from the remote store
//!
//! The remote delivers [`WireRecord`]s in which every field is optional.
//! [`EstimateRecord::from_wire`] is the single validation point: a record
//! that passes it is well formed for the rest of the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{EntityKey, PartitionKey, PulseError, PulseResult};

/// Default k-anonymity threshold: an estimate is only shown once this many
/// independent observations have been folded in
pub const DEFAULT_K_ANONYMITY: f64 = 5.0;

/// Record as delivered by fetch or push, before validation
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WireRecord {
    pub key: Option<String>,
    pub partition: Option<String>,
    pub prior_mean: Option<f64>,
    pub posterior_mean: Option<f64>,
    pub prior_spread: Option<f64>,
    pub posterior_spread: Option<f64>,
    pub divergence_z: Option<f64>,
    pub effective_count: Option<f64>,
    pub visible: Option<bool>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Latest known estimate for one entity in one partition
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimateRecord {
    pub key: EntityKey,
    pub partition: PartitionKey,
    pub prior_mean: f64,
    pub posterior_mean: Option<f64>,
    pub prior_spread: Option<f64>,
    pub posterior_spread: Option<f64>,
    pub divergence_z: Option<f64>,
    /// Always >= 0
    pub effective_count: f64,
    pub visible: bool,
    pub updated_at: DateTime<Utc>,
}

impl EstimateRecord {
    /// Create a prior-only record (no observations folded in yet)
    pub fn prior(
        key: impl Into<EntityKey>,
        partition: impl Into<PartitionKey>,
        prior_mean: f64,
    ) -> Self {
        EstimateRecord {
            key: key.into(),
            partition: partition.into(),
            prior_mean,
            posterior_mean: None,
            prior_spread: None,
            posterior_spread: None,
            divergence_z: None,
            effective_count: 0.0,
            visible: false,
            updated_at: Utc::now(),
        }
    }

    /// Builder: attach a posterior
    pub fn with_posterior(
        mut self,
        posterior_mean: f64,
        effective_count: f64,
        visible: bool,
    ) -> Self {
        self.posterior_mean = Some(posterior_mean);
        self.effective_count = effective_count;
        self.visible = visible;
        self
    }

    /// Builder: attach a divergence score
    pub fn with_divergence(mut self, z: f64) -> Self {
        self.divergence_z = Some(z);
        self
    }

    /// Validate a wire record.
    ///
    /// `received_at` stands in for a missing `updatedAt`. A record claiming
    /// `visible` with fewer than `k_anonymity` effective observations is
    /// downgraded to hidden rather than rejected.
    pub fn from_wire(
        wire: WireRecord,
        received_at: DateTime<Utc>,
        k_anonymity: f64,
    ) -> PulseResult<Self> {
        let key = match wire.key {
            Some(k) if !k.trim().is_empty() => EntityKey::from(k),
            _ => return Err(PulseError::missing("key")),
        };
        let partition = match wire.partition {
            Some(p) if !p.trim().is_empty() => PartitionKey::from(p),
            _ => return Err(PulseError::missing("partition")),
        };
        let prior_mean =
            finite("priorMean", wire.prior_mean)?.ok_or(PulseError::missing("priorMean"))?;
        let effective_count = finite("effectiveCount", wire.effective_count)?
            .ok_or(PulseError::missing("effectiveCount"))?;
        if effective_count < 0.0 {
            return Err(PulseError::MalformedRecord {
                field: "effectiveCount",
                problem: "is negative",
            });
        }

        let posterior_mean = finite("posteriorMean", wire.posterior_mean)?;
        let prior_spread = finite("priorSpread", wire.prior_spread)?;
        let posterior_spread = finite("posteriorSpread", wire.posterior_spread)?;
        let divergence_z = finite("divergenceZ", wire.divergence_z)?;

        let visible = wire.visible.unwrap_or(false) && effective_count >= k_anonymity;

        Ok(EstimateRecord {
            key,
            partition,
            prior_mean,
            posterior_mean,
            prior_spread,
            posterior_spread,
            divergence_z,
            effective_count,
            visible,
            updated_at: wire.updated_at.unwrap_or(received_at),
        })
    }

    /// Mean shown to viewers: the posterior once visible, else the prior
    pub fn displayed_mean(&self) -> f64 {
        match (self.visible, self.posterior_mean) {
            (true, Some(posterior)) => posterior,
            _ => self.prior_mean,
        }
    }
}

impl From<EstimateRecord> for WireRecord {
    fn from(record: EstimateRecord) -> Self {
        WireRecord {
            key: Some(record.key.as_str().to_owned()),
            partition: Some(record.partition.as_str().to_owned()),
            prior_mean: Some(record.prior_mean),
            posterior_mean: record.posterior_mean,
            prior_spread: record.prior_spread,
            posterior_spread: record.posterior_spread,
            divergence_z: record.divergence_z,
            effective_count: Some(record.effective_count),
            visible: Some(record.visible),
            updated_at: Some(record.updated_at),
        }
    }
}

fn finite(field: &'static str, value: Option<f64>) -> PulseResult<Option<f64>> {
    match value {
        Some(v) if !v.is_finite() => Err(PulseError::non_finite(field)),
        other => Ok(other),
    }
}
