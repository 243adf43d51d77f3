//! Shared model-judge plumbing for the builtin evaluators
//!
//! A judge call sends an instruction plus the material under evaluation and
//! expects a JSON verdict `{"score": <0..1>, "reasoning": "..."}` back.
//! Scores are clamped into range, so a slightly out-of-band model answer
//! still yields a usable verdict.

use crate::connector::{ChatMessage, ConnectorError, InvokeRequest, ModelConnector, ModelId};
use crate::domain::{Reasoning, Score, TenantId};
use crate::evaluators::Judgment;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Model addressed for verdicts
const JUDGE_MODEL: &str = "crucible-judge";

#[derive(Debug, Deserialize)]
struct WireVerdict {
    score: f64,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Extract the verdict JSON from a judge reply, tolerating surrounding prose
fn parse_verdict(text: &str) -> Option<WireVerdict> {
    if let Ok(verdict) = serde_json::from_str::<WireVerdict>(text) {
        return Some(verdict);
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

/// Judge handle shared by the builtin evaluators
pub struct LlmJudge {
    connector: Arc<dyn ModelConnector>,
    model_id: ModelId,
    timeout: Duration,
}

impl LlmJudge {
    pub fn new(connector: Arc<dyn ModelConnector>, timeout: Duration) -> Self {
        Self {
            connector,
            model_id: ModelId::try_new(JUDGE_MODEL.to_string())
                .expect("judge model constant is a valid model id"),
            timeout,
        }
    }

    /// Run one judge call and parse its verdict
    pub async fn score(
        &self,
        tenant_id: &TenantId,
        instruction: &str,
        material: String,
        idempotency_key: String,
    ) -> std::result::Result<Judgment, ConnectorError> {
        let response = self
            .connector
            .invoke(InvokeRequest {
                model_id: self.model_id.clone(),
                messages: vec![
                    ChatMessage::system(format!(
                        "{instruction}\nAnswer with a JSON object: \
                         {{\"score\": <number between 0 and 1>, \"reasoning\": \"...\"}}"
                    )),
                    ChatMessage::user(material),
                ],
                parameters: serde_json::json!({"temperature": 0.0}),
                timeout: self.timeout,
                idempotency_key,
                tenant_id: tenant_id.clone(),
            })
            .await?;

        let verdict = parse_verdict(&response.text).ok_or_else(|| {
            ConnectorError::Transport("judge returned an unparseable verdict".to_string())
        })?;
        let reasoning = verdict.reasoning.unwrap_or_default();
        let reasoning = Reasoning::try_new(reasoning.chars().take(10000).collect::<String>())
            .map_err(|_| ConnectorError::Transport("judge reasoning too large".to_string()))?;
        Ok(Judgment {
            score: Score::clamped(verdict.score),
            reasoning,
        })
    }
}
