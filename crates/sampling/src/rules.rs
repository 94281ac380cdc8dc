//! Rule assembly for the ingestion layer.
//!
//! The relay/ingestion layer consumes a JSON rule list per project. Order
//! matters downstream: "factor" rules multiply whatever absolute rate
//! follows them, so the generator always emits the recalibration factor
//! rule (when one is stored) before the absolute "sampleRate" rule.

use serde::{Deserialize, Serialize};
use sieve_core::{OrgId, ProjectId};
use sieve_store::{ProjectBoostStore, RecalibrationStore, SlidingWindowStore};
use std::sync::Arc;

use crate::quotas::QuotaService;

/// Reserved rule id for the uniform per-project sampleRate rule.
pub const RULE_ID_UNIFORM: i64 = 1000;

/// Reserved rule id for the org-wide recalibration factor rule.
pub const RULE_ID_RECALIBRATION: i64 = 1004;

/// What the rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    Trace,
    Transaction,
    Error,
}

/// The sampling decision a rule carries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SamplingValue {
    SampleRate { value: f64 },
    Factor { value: f64 },
}

/// Match condition; the rules emitted here apply unconditionally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleCondition {
    pub op: String,
    pub inner: Vec<serde_json::Value>,
}

impl RuleCondition {
    /// The always-true condition: `{"op":"and","inner":[]}`.
    pub fn match_all() -> Self {
        Self {
            op: "and".into(),
            inner: Vec::new(),
        }
    }
}

/// One externally visible sampling rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplingRule {
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    pub sampling_value: SamplingValue,
    pub condition: RuleCondition,
    pub id: i64,
}

/// Assembles the rule list for one project.
pub struct RuleGenerator {
    recalibration: RecalibrationStore,
    boost: ProjectBoostStore,
    sliding_window: Arc<SlidingWindowStore>,
    quotas: Arc<dyn QuotaService>,
}

impl RuleGenerator {
    pub fn new(
        recalibration: RecalibrationStore,
        boost: ProjectBoostStore,
        sliding_window: Arc<SlidingWindowStore>,
        quotas: Arc<dyn QuotaService>,
    ) -> Self {
        Self {
            recalibration,
            boost,
            sliding_window,
            quotas,
        }
    }

    /// Build the rule list for a project, factor rule first.
    ///
    /// The sample rate resolves through: boosted per-project rate, then
    /// cached sliding-window rate, then the blended rate. Store outages
    /// degrade each lookup independently; this method never fails.
    pub async fn generate_rules(&self, org_id: OrgId, project_id: ProjectId) -> Vec<SamplingRule> {
        let mut rules = Vec::with_capacity(2);

        let factor = match self.recalibration.get_factor(org_id).await {
            Ok(factor) => factor,
            Err(err) => {
                tracing::warn!(org_id, %err, "recalibration factor read failed; omitting factor rule");
                None
            }
        };
        if let Some(factor) = factor {
            if factor > 0.0 {
                rules.push(SamplingRule {
                    rule_type: RuleType::Trace,
                    sampling_value: SamplingValue::Factor { value: factor },
                    condition: RuleCondition::match_all(),
                    id: RULE_ID_RECALIBRATION,
                });
            }
        }

        let rate = match self.boost.get(org_id, project_id).await {
            Some(rate) => rate,
            None => match self.sliding_window.get(org_id, project_id).await {
                Some(rate) => rate,
                None => self.quotas.blended_sample_rate(org_id),
            },
        };
        rules.push(SamplingRule {
            rule_type: RuleType::Trace,
            sampling_value: SamplingValue::SampleRate {
                value: rate.clamp(0.0, 1.0),
            },
            condition: RuleCondition::match_all(),
            id: RULE_ID_UNIFORM,
        });

        rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::compute_project_boost;
    use crate::quotas::StaticTierTable;
    use sieve_events::ControlBus;
    use sieve_store::MemoryStore;
    use std::collections::HashMap;

    fn generator(kv: Arc<MemoryStore>) -> RuleGenerator {
        let bus = Arc::new(ControlBus::default());
        RuleGenerator::new(
            RecalibrationStore::new(kv.clone()),
            ProjectBoostStore::new(kv.clone()),
            Arc::new(SlidingWindowStore::new(kv, bus)),
            Arc::new(StaticTierTable::new(0.25, Vec::new())),
        )
    }

    #[tokio::test]
    async fn without_state_only_the_blended_rule_is_emitted() {
        let generator = generator(Arc::new(MemoryStore::new()));
        let rules = generator.generate_rules(1, 10).await;

        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id, RULE_ID_UNIFORM);
        assert_eq!(
            rules[0].sampling_value,
            SamplingValue::SampleRate { value: 0.25 }
        );
    }

    #[tokio::test]
    async fn factor_rule_always_precedes_sample_rate_rule() {
        let kv = Arc::new(MemoryStore::new());
        RecalibrationStore::new(kv.clone())
            .set_factor(1, 2.0)
            .await
            .unwrap();

        let generator = generator(kv);
        let rules = generator.generate_rules(1, 10).await;

        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].id, RULE_ID_RECALIBRATION);
        assert_eq!(rules[0].sampling_value, SamplingValue::Factor { value: 2.0 });
        assert_eq!(rules[1].id, RULE_ID_UNIFORM);
    }

    #[tokio::test]
    async fn boosted_rate_wins_over_sliding_window_and_blended() {
        let kv = Arc::new(MemoryStore::new());
        ProjectBoostStore::new(kv.clone())
            .set_rates(1, &HashMap::from([(10, 0.4)]))
            .await
            .unwrap();
        let bus = Arc::new(ControlBus::default());
        SlidingWindowStore::new(kv.clone(), bus)
            .set(1, 10, 0.9)
            .await
            .unwrap();

        let generator = generator(kv);
        let rules = generator.generate_rules(1, 10).await;
        assert_eq!(
            rules[0].sampling_value,
            SamplingValue::SampleRate { value: 0.4 }
        );
    }

    #[tokio::test]
    async fn sliding_window_rate_used_when_no_boost_entry() {
        let kv = Arc::new(MemoryStore::new());
        let bus = Arc::new(ControlBus::default());
        SlidingWindowStore::new(kv.clone(), bus)
            .set(1, 10, 0.9)
            .await
            .unwrap();

        let generator = generator(kv);
        let rules = generator.generate_rules(1, 10).await;
        assert_eq!(
            rules[0].sampling_value,
            SamplingValue::SampleRate { value: 0.9 }
        );
    }

    #[tokio::test]
    async fn zero_metric_project_gets_full_retention() {
        let kv = Arc::new(MemoryStore::new());
        let rates = compute_project_boost(&HashMap::from([(10, 0), (11, 100)]), 10.0);
        ProjectBoostStore::new(kv.clone())
            .set_rates(1, &rates)
            .await
            .unwrap();

        let generator = generator(kv);
        let rules = generator.generate_rules(1, 10).await;
        assert_eq!(
            rules[0].sampling_value,
            SamplingValue::SampleRate { value: 1.0 }
        );
    }

    #[tokio::test]
    async fn store_outage_degrades_to_blended_rule_only() {
        let kv = Arc::new(MemoryStore::new());
        RecalibrationStore::new(kv.clone())
            .set_factor(1, 2.0)
            .await
            .unwrap();

        kv.set_unavailable(true);
        let generator = generator(kv);
        let rules = generator.generate_rules(1, 10).await;

        assert_eq!(rules.len(), 1);
        assert_eq!(
            rules[0].sampling_value,
            SamplingValue::SampleRate { value: 0.25 }
        );
    }

    #[test]
    fn rules_serialize_to_the_wire_shape() {
        let rule = SamplingRule {
            rule_type: RuleType::Trace,
            sampling_value: SamplingValue::SampleRate { value: 0.5 },
            condition: RuleCondition::match_all(),
            id: RULE_ID_UNIFORM,
        };
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "trace",
                "samplingValue": {"type": "sampleRate", "value": 0.5},
                "condition": {"op": "and", "inner": []},
                "id": 1000,
            })
        );

        let factor = SamplingRule {
            rule_type: RuleType::Trace,
            sampling_value: SamplingValue::Factor { value: 2.0 },
            condition: RuleCondition::match_all(),
            id: RULE_ID_RECALIBRATION,
        };
        let json = serde_json::to_value(&factor).unwrap();
        assert_eq!(json["samplingValue"]["type"], "factor");
    }
}
