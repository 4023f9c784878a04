//! 干预措施目录与排序
//!
//! 按压力区匹配，证据等级高者优先，其次匹配的压力区数量多者优先。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// 压力区
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PressureZone {
    Work,
    Home,
    Health,
    Emotional,
    Social,
    Time,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceLevel {
    Low,
    Moderate,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Intervention {
    pub id: String,
    pub title: String,
    pub description: String,
    pub zones: Vec<PressureZone>,
    pub evidence: EvidenceLevel,
}

impl Intervention {
    fn new(id: &str, title: &str, description: &str, zones: &[PressureZone], evidence: EvidenceLevel) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            zones: zones.to_vec(),
            evidence,
        }
    }

    fn matching_zones(&self, zones: &[PressureZone]) -> usize {
        self.zones.iter().filter(|z| zones.contains(z)).count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RankedIntervention {
    #[serde(flatten)]
    pub intervention: Intervention,
    pub matched_zones: usize,
}

#[derive(Debug, Clone, Default)]
pub struct InterventionCatalog {
    items: Vec<Intervention>,
}

impl InterventionCatalog {
    pub fn new(items: Vec<Intervention>) -> Self {
        Self { items }
    }

    pub fn builtin() -> Self {
        use EvidenceLevel::*;
        use PressureZone::*;
        Self::new(vec![
            Intervention::new(
                "mbsr",
                "Mindfulness-Based Stress Reduction",
                "Short guided breathing and body-scan sessions.",
                &[Emotional],
                High,
            ),
            Intervention::new(
                "reframing",
                "Cognitive Reframing",
                "Notice a stressful thought and write a kinder alternative.",
                &[Emotional, Home],
                High,
            ),
            Intervention::new(
                "peer-support",
                "Peer Support Groups",
                "Join a caregiver group to share experiences.",
                &[Emotional, Social],
                High,
            ),
            Intervention::new(
                "sleep-hygiene",
                "Sleep Hygiene Protocol",
                "Consistent bedtime, screens off an hour before sleep.",
                &[Health, Emotional],
                High,
            ),
            Intervention::new(
                "micro-exercise",
                "Micro-Exercise Breaks",
                "Five-minute movement breaks between care tasks.",
                &[Health, Time],
                Moderate,
            ),
            Intervention::new(
                "boundaries",
                "Boundary Setting Scripts",
                "Prepared phrases for saying no at work and at home.",
                &[Work, Home, Social],
                Moderate,
            ),
            Intervention::new(
                "care-schedule",
                "Shared Care Schedule",
                "Split care tasks with family on a visible weekly calendar.",
                &[Home, Time],
                Moderate,
            ),
            Intervention::new(
                "flex-work",
                "Flexible Work Conversation",
                "Plan a conversation with your employer about caregiving leave or flexible hours.",
                &[Work, Time],
                Low,
            ),
        ])
    }

    /// 匹配任一压力区的干预，按证据等级、匹配数、标题排序后截断
    pub fn rank(&self, zones: &[PressureZone], limit: Option<usize>) -> Vec<RankedIntervention> {
        let mut ranked: Vec<RankedIntervention> = self
            .items
            .iter()
            .filter_map(|item| {
                let matched = item.matching_zones(zones);
                (matched > 0).then(|| RankedIntervention {
                    intervention: item.clone(),
                    matched_zones: matched,
                })
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.intervention
                .evidence
                .cmp(&a.intervention.evidence)
                .then(b.matched_zones.cmp(&a.matched_zones))
                .then_with(|| a.intervention.title.cmp(&b.intervention.title))
        });

        if let Some(limit) = limit {
            ranked.truncate(limit);
        }
        ranked
    }
}
