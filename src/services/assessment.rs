//! 评估问卷定义与计分
//!
//! 分数 0-100，越高越健康；按分数段划分倦怠等级。

use std::collections::HashMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_DEFINITION: &str = "burnout_v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    Scale,
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentQuestion {
    pub id: String,
    pub prompt: String,
    #[serde(rename = "type")]
    pub kind: QuestionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl AssessmentQuestion {
    fn scale(id: &str, prompt: &str, min: f64, max: f64) -> Self {
        Self {
            id: id.to_string(),
            prompt: prompt.to_string(),
            kind: QuestionKind::Scale,
            min: Some(min),
            max: Some(max),
        }
    }

    /// 量表取值范围，未声明时为 0-4
    pub fn range(&self) -> (f64, f64) {
        (self.min.unwrap_or(0.0), self.max.unwrap_or(4.0))
    }

    pub fn accepts(&self, value: f64) -> bool {
        let (min, max) = self.range();
        value.is_finite() && value >= min && value <= max
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssessmentDefinition {
    pub id: String,
    pub title: String,
    pub questions: Vec<AssessmentQuestion>,
}

impl AssessmentDefinition {
    /// 指定题目之后的下一题
    pub fn next_after(&self, question_id: &str) -> Option<&AssessmentQuestion> {
        let idx = self.questions.iter().position(|q| q.id == question_id)?;
        self.questions.get(idx + 1)
    }
}

/// 倦怠等级（分数越低越严重）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BurnoutBand {
    Crisis,
    High,
    Moderate,
    Mild,
    Thriving,
}

impl BurnoutBand {
    pub fn from_score(score: f64) -> Self {
        if score < 20.0 {
            BurnoutBand::Crisis
        } else if score < 40.0 {
            BurnoutBand::High
        } else if score < 60.0 {
            BurnoutBand::Moderate
        } else if score < 80.0 {
            BurnoutBand::Mild
        } else {
            BurnoutBand::Thriving
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AssessmentScore {
    pub score: f64,
    pub band: BurnoutBand,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AssessmentError {
    #[error("Unknown assessment definition: {0}")]
    UnknownDefinition(String),

    #[error("No answers to score")]
    NoAnswers,

    #[error("Too many answers: {given} for {expected} questions")]
    TooManyAnswers { given: usize, expected: usize },

    #[error("Answer {index} out of range: {value} not in [{min}, {max}]")]
    AnswerOutOfRange {
        index: usize,
        value: f64,
        min: f64,
        max: f64,
    },
}

/// 问卷目录与计分
#[derive(Debug, Clone, Default)]
pub struct AssessmentService {
    definitions: HashMap<String, AssessmentDefinition>,
}

impl AssessmentService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtin() -> Self {
        let mut service = Self::new();
        service.add(AssessmentDefinition {
            id: DEFAULT_DEFINITION.to_string(),
            title: "Caregiver burnout check".to_string(),
            questions: vec![
                AssessmentQuestion::scale("energy", "How much energy do you have?", 0.0, 4.0),
                AssessmentQuestion::scale("sleep", "How well have you been sleeping?", 0.0, 4.0),
                AssessmentQuestion::scale("support", "How supported do you feel?", 0.0, 4.0),
                AssessmentQuestion::scale(
                    "tasks",
                    "How manageable do your caregiving tasks feel?",
                    0.0,
                    4.0,
                ),
                AssessmentQuestion::scale(
                    "respite",
                    "How often do you get time for yourself?",
                    0.0,
                    4.0,
                ),
            ],
        });
        service
    }

    pub fn add(&mut self, definition: AssessmentDefinition) {
        self.definitions.insert(definition.id.clone(), definition);
    }

    pub fn definition(&self, id: &str) -> Option<&AssessmentDefinition> {
        self.definitions.get(id)
    }

    /// 第 i 个答案对应第 i 道量表题；跳过的题不计入
    pub fn score(&self, definition_id: &str, answers: &[f64]) -> Result<AssessmentScore, AssessmentError> {
        let definition = self
            .definition(definition_id)
            .ok_or_else(|| AssessmentError::UnknownDefinition(definition_id.to_string()))?;
        if answers.is_empty() {
            return Err(AssessmentError::NoAnswers);
        }

        let scale: Vec<&AssessmentQuestion> = definition
            .questions
            .iter()
            .filter(|q| q.kind == QuestionKind::Scale)
            .collect();
        if answers.len() > scale.len() {
            return Err(AssessmentError::TooManyAnswers {
                given: answers.len(),
                expected: scale.len(),
            });
        }

        let mut total = 0.0;
        for (index, (value, question)) in answers.iter().zip(scale).enumerate() {
            let (min, max) = question.range();
            if !value.is_finite() || *value < min || *value > max {
                return Err(AssessmentError::AnswerOutOfRange {
                    index,
                    value: *value,
                    min,
                    max,
                });
            }
            let span = (max - min).max(f64::EPSILON);
            total += (value - min) / span;
        }

        let score = (total / answers.len() as f64 * 100.0).round().clamp(0.0, 100.0);
        Ok(AssessmentScore {
            score,
            band: BurnoutBand::from_score(score),
        })
    }
}
