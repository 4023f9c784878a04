//! 纯领域计算：评估计分、干预排序（随访时间计算见 scheduler::schedule）

pub mod assessment;
pub mod interventions;

pub use assessment::{
    AssessmentDefinition, AssessmentError, AssessmentQuestion, AssessmentScore, AssessmentService,
    BurnoutBand, QuestionKind, DEFAULT_DEFINITION,
};
pub use interventions::{EvidenceLevel, Intervention, InterventionCatalog, PressureZone, RankedIntervention};

/// 能力处理函数可用的领域服务
#[derive(Debug, Clone, Default)]
pub struct Services {
    pub assessment: AssessmentService,
    pub interventions: InterventionCatalog,
}

impl Services {
    pub fn builtin() -> Self {
        Self {
            assessment: AssessmentService::with_builtin(),
            interventions: InterventionCatalog::builtin(),
        }
    }
}
