//! 策略层：规则类型、谓词树求值、危机信号、策略包加载

pub mod engine;
pub mod loader;
pub mod signals;
pub mod types;

pub use engine::evaluate;
pub use loader::{builtin_bundles, load_bundles, PolicyLoadError, PolicyStore};
pub use signals::{detect_crisis_terms, CrisisSignals};
pub use types::{
    Condition, ConsentScope, PolicyBundle, PolicyContext, PolicyDecision, PolicyRule,
    RouteOverride, RuleEffect, RuleHit, CRISIS_RESOURCES,
};
