//! 危机信号检测：固定词表、词边界、忽略大小写

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::capabilities::TurnContext;

const CRISIS_TERMS: &[&str] = &[
    "suicide",
    "suicidal",
    "kill myself",
    "end it",
    "hurt myself",
    "self harm",
    "self-harm",
    "want to die",
];

fn crisis_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        let alternation = CRISIS_TERMS
            .iter()
            .map(|t| regex::escape(t))
            .collect::<Vec<_>>()
            .join("|");
        Regex::new(&format!(r"(?i)\b(?:{alternation})\b")).ok()
    })
    .as_ref()
}

/// 返回文本中命中的危机词（小写、去重、按出现顺序）
pub fn detect_crisis_terms(text: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    let mut push = |term: String| {
        if !found.contains(&term) {
            found.push(term);
        }
    };

    match crisis_regex() {
        Some(re) => {
            for m in re.find_iter(text) {
                push(m.as_str().to_lowercase());
            }
        }
        None => {
            let lower = text.to_lowercase();
            for term in CRISIS_TERMS {
                if lower.contains(term) {
                    push(term.to_string());
                }
            }
        }
    }
    found
}

/// 本轮危机信号：调用方显式标记，或入站文本命中词表
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrisisSignals {
    pub active: bool,
    pub terms: Vec<String>,
}

impl CrisisSignals {
    pub fn for_turn(turn: &TurnContext) -> Self {
        let terms = detect_crisis_terms(&turn.text);
        Self {
            active: turn.crisis_flagged || !terms.is_empty(),
            terms,
        }
    }
}
