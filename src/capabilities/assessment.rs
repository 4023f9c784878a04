//! 评估相关能力：开始会话、记录答案、离线计分

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;

use crate::capabilities::context::ExecutionContext;
use crate::capabilities::registry::{Capability, CapabilityError, Hint};
use crate::ports::{AnswerOutcome, AnswerRecord, SessionStart};
use crate::services::{AssessmentScore, DEFAULT_DEFINITION};

/// assessment.start
pub struct StartAssessment;

#[derive(Debug, Default, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartAssessmentInput {
    /// 问卷定义，缺省为 burnout_v1
    pub definition_id: Option<String>,
}

#[async_trait]
impl Capability for StartAssessment {
    type Input = StartAssessmentInput;
    type Output = SessionStart;

    fn name(&self) -> &'static str {
        "assessment.start"
    }

    fn description(&self) -> &'static str {
        "Start an assessment session and return its first question"
    }

    fn latency_hint(&self) -> Hint {
        Hint::Medium
    }

    async fn run(&self, input: StartAssessmentInput, ctx: &ExecutionContext) -> Result<SessionStart, CapabilityError> {
        let definition_id = input.definition_id.as_deref().unwrap_or(DEFAULT_DEFINITION);
        let started = ctx
            .store
            .start_assessment_session(&ctx.user_id, definition_id)
            .await?;
        tracing::info!(user_id = %ctx.user_id, session_id = %started.session_id, "assessment started");
        Ok(started)
    }
}

/// assessment.recordAnswer
pub struct RecordAnswer;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RecordAnswerInput {
    #[schemars(length(min = 1))]
    pub session_id: String,
    #[schemars(length(min = 1))]
    pub question_id: String,
    pub value: f64,
}

#[async_trait]
impl Capability for RecordAnswer {
    type Input = RecordAnswerInput;
    type Output = AnswerOutcome;

    fn name(&self) -> &'static str {
        "assessment.recordAnswer"
    }

    fn description(&self) -> &'static str {
        "Record the answer to the pending question of an assessment session"
    }

    async fn run(&self, input: RecordAnswerInput, ctx: &ExecutionContext) -> Result<AnswerOutcome, CapabilityError> {
        let outcome = ctx
            .store
            .record_assessment_answer(AnswerRecord {
                user_id: ctx.user_id.clone(),
                session_id: input.session_id,
                question_id: input.question_id,
                value: input.value,
            })
            .await?;
        if outcome.completed {
            tracing::info!(user_id = %ctx.user_id, score = ?outcome.score, "assessment completed");
        }
        Ok(outcome)
    }
}

/// assessment.score：不落库，直接按定义计分
pub struct ScoreAssessment;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ScoreAssessmentInput {
    #[schemars(length(min = 1))]
    pub definition_id: String,
    #[schemars(length(min = 1))]
    pub answers: Vec<f64>,
}

#[async_trait]
impl Capability for ScoreAssessment {
    type Input = ScoreAssessmentInput;
    type Output = AssessmentScore;

    fn name(&self) -> &'static str {
        "assessment.score"
    }

    fn description(&self) -> &'static str {
        "Score a complete set of answers (0-100, higher is healthier)"
    }

    async fn run(&self, input: ScoreAssessmentInput, ctx: &ExecutionContext) -> Result<AssessmentScore, CapabilityError> {
        Ok(ctx
            .services
            .assessment
            .score(&input.definition_id, &input.answers)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::testing::Fixture;
    use crate::capabilities::TurnContext;

    #[tokio::test]
    async fn test_start_then_answer() {
        let fixture = Fixture::new();
        let ctx = fixture.context(TurnContext::new("u1"));

        let started = StartAssessment
            .run(StartAssessmentInput::default(), &ctx)
            .await
            .unwrap();
        let first = started.question.unwrap();
        assert_eq!(first.id, "energy");

        let outcome = RecordAnswer
            .run(
                RecordAnswerInput {
                    session_id: started.session_id,
                    question_id: first.id,
                    value: 3.0,
                },
                &ctx,
            )
            .await
            .unwrap();
        assert!(!outcome.completed);
        assert_eq!(outcome.next_question.unwrap().id, "sleep");
    }

    #[tokio::test]
    async fn test_unknown_session_is_fatal() {
        let fixture = Fixture::new();
        let ctx = fixture.context(TurnContext::new("u1"));
        let err = RecordAnswer
            .run(
                RecordAnswerInput {
                    session_id: "missing".to_string(),
                    question_id: "energy".to_string(),
                    value: 1.0,
                },
                &ctx,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::Failed(_)));
    }

    #[tokio::test]
    async fn test_score_out_of_range() {
        let fixture = Fixture::new();
        let ctx = fixture.context(TurnContext::new("u1"));
        let err = ScoreAssessment
            .run(
                ScoreAssessmentInput {
                    definition_id: "burnout_v1".to_string(),
                    answers: vec![9.0],
                },
                &ctx,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CapabilityError::InvalidArgument(_)));
    }
}
