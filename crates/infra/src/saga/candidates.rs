//! Candidate lookup for the scheduling saga.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::projections::routes::ELIGIBLE_CANDIDATES;
use crate::projections::{ProjectionViewRecord, ViewStore};
use crate::store::StoreError;

/// Fixed ordinal skill scale.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillTier {
    Novice,
    Intermediate,
    Advanced,
    Expert,
    Master,
}

impl SkillTier {
    pub fn rank(self) -> u8 {
        match self {
            SkillTier::Novice => 1,
            SkillTier::Intermediate => 2,
            SkillTier::Advanced => 3,
            SkillTier::Expert => 4,
            SkillTier::Master => 5,
        }
    }

    /// True when this (granted) tier meets `required`.
    pub fn meets(self, required: SkillTier) -> bool {
        self.rank() >= required.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SkillTier::Novice => "novice",
            SkillTier::Intermediate => "intermediate",
            SkillTier::Advanced => "advanced",
            SkillTier::Expert => "expert",
            SkillTier::Master => "master",
        }
    }
}

impl fmt::Display for SkillTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillRequirement {
    pub tag_slug: String,
    pub minimum_tier: SkillTier,
}

impl fmt::Display for SkillRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}>={}", self.tag_slug, self.minimum_tier)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub member_id: String,
    pub eligible: bool,
    pub skills: HashMap<String, SkillTier>,
}

impl Candidate {
    pub fn satisfies(&self, requirement: &SkillRequirement) -> bool {
        self.skills
            .get(&requirement.tag_slug)
            .is_some_and(|granted| granted.meets(requirement.minimum_tier))
    }

    pub fn satisfies_all(&self, requirements: &[SkillRequirement]) -> bool {
        self.eligible && requirements.iter().all(|r| self.satisfies(r))
    }
}

#[async_trait]
pub trait CandidateDirectory: Send + Sync {
    /// Members currently eligible for assignment. `requirements` is a hint;
    /// callers still check every constraint.
    async fn eligible_candidates(
        &self,
        requirements: &[SkillRequirement],
    ) -> Result<Vec<Candidate>, StoreError>;
}

/// Reads candidates from the `eligible_candidates` projection view.
pub struct ProjectionCandidateDirectory {
    views: Arc<dyn ViewStore>,
}

impl ProjectionCandidateDirectory {
    pub fn new(views: Arc<dyn ViewStore>) -> Self {
        Self { views }
    }
}

fn candidate_from_view(key: String, record: &ProjectionViewRecord) -> Candidate {
    let member_id = record
        .field("memberId")
        .and_then(JsonValue::as_str)
        .map(str::to_string)
        .unwrap_or(key);
    let eligible = record
        .field("eligible")
        .and_then(JsonValue::as_bool)
        .unwrap_or(false);

    let mut skills = HashMap::new();
    if let Some(JsonValue::Object(map)) = record.field("skills") {
        for (tag, tier) in map {
            match serde_json::from_value::<SkillTier>(tier.clone()) {
                Ok(tier) => {
                    skills.insert(tag.clone(), tier);
                }
                Err(_) => warn!(member_id = %member_id, tag = %tag, value = %tier, "unknown skill tier ignored"),
            }
        }
    }

    Candidate {
        member_id,
        eligible,
        skills,
    }
}

#[async_trait]
impl CandidateDirectory for ProjectionCandidateDirectory {
    async fn eligible_candidates(
        &self,
        _requirements: &[SkillRequirement],
    ) -> Result<Vec<Candidate>, StoreError> {
        Ok(self
            .views
            .list(ELIGIBLE_CANDIDATES)
            .await?
            .into_iter()
            .map(|(key, record)| candidate_from_view(key, &record))
            .filter(|c| c.eligible)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use eventrail_core::{EventId, TraceId};
    use serde_json::json;

    use super::*;
    use crate::projections::InMemoryViewStore;

    fn req(tag: &str, tier: SkillTier) -> SkillRequirement {
        SkillRequirement {
            tag_slug: tag.into(),
            minimum_tier: tier,
        }
    }

    #[test]
    fn tiers_are_ordered() {
        assert!(SkillTier::Master.meets(SkillTier::Expert));
        assert!(SkillTier::Expert.meets(SkillTier::Expert));
        assert!(!SkillTier::Advanced.meets(SkillTier::Expert));
        assert!(SkillTier::Novice.rank() < SkillTier::Intermediate.rank());
    }

    #[test]
    fn requirement_parses_from_camel_case() {
        let r: SkillRequirement =
            serde_json::from_value(json!({ "tagSlug": "rust", "minimumTier": "expert" })).unwrap();
        assert_eq!(r, req("rust", SkillTier::Expert));
        assert_eq!(r.to_string(), "rust>=expert");
    }

    #[test]
    fn ineligible_candidate_never_satisfies() {
        let c = Candidate {
            member_id: "m1".into(),
            eligible: false,
            skills: HashMap::from([("rust".to_string(), SkillTier::Master)]),
        };
        assert!(c.satisfies(&req("rust", SkillTier::Novice)));
        assert!(!c.satisfies_all(&[req("rust", SkillTier::Novice)]));
    }

    #[tokio::test]
    async fn directory_reads_eligible_members_from_view() {
        let views = Arc::new(InMemoryViewStore::new());
        let write = |fields: JsonValue| ProjectionViewRecord {
            fields: fields.as_object().cloned().unwrap_or_default(),
            last_processed_version: 1,
            trace_id: TraceId::parse("t").unwrap(),
            last_event_id: EventId::new(),
            updated_at: Utc::now(),
        };
        views
            .write(ELIGIBLE_CANDIDATES, "m1", write(json!({ "eligible": true, "skills": { "rust": "expert", "x": "guru" } })))
            .await
            .unwrap();
        views
            .write(ELIGIBLE_CANDIDATES, "m2", write(json!({ "eligible": false })))
            .await
            .unwrap();

        let directory = ProjectionCandidateDirectory::new(views);
        let found = directory.eligible_candidates(&[]).await.unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].member_id, "m1");
        assert_eq!(found[0].skills.get("rust"), Some(&SkillTier::Expert));
        assert!(!found[0].skills.contains_key("x"));
    }
}
