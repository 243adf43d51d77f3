//! Conversation port
//!
//! The runner obtains the system response through this port. The execution's
//! `params` map stays opaque to the core; the default implementation reads
//! `conversation_spec_id` out of it and addresses that spec as a model id.

use crate::connector::{
    ChatMessage, ConnectorError, InvokeRequest, ModelConnector, ModelId,
};
use crate::domain::{CaseContext, ExecutionParams, LatencyMs, SystemResponse, TenantId, UserInput};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// System response plus observed latency
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationReply {
    pub text: SystemResponse,
    pub latency_ms: LatencyMs,
}

/// Port for the target conversation system
#[async_trait]
pub trait Conversation: Send + Sync {
    async fn converse(
        &self,
        tenant_id: &TenantId,
        params: &ExecutionParams,
        user_input: &UserInput,
        context: &CaseContext,
        idempotency_key: String,
    ) -> std::result::Result<ConversationReply, ConnectorError>;
}

/// Conversation implementation backed by the model connector
pub struct ModelBackedConversation {
    connector: Arc<dyn ModelConnector>,
    timeout: Duration,
}

impl ModelBackedConversation {
    pub fn new(connector: Arc<dyn ModelConnector>, timeout: Duration) -> Self {
        Self { connector, timeout }
    }

    fn resolve_model(params: &ExecutionParams) -> std::result::Result<ModelId, ConnectorError> {
        let spec = params
            .as_ref()
            .get("conversation_spec_id")
            .and_then(|value| value.as_str())
            .unwrap_or("default");
        ModelId::try_new(spec.to_string())
            .map_err(|_| ConnectorError::BadRequest(format!("bad conversation spec {spec}")))
    }
}

#[async_trait]
impl Conversation for ModelBackedConversation {
    async fn converse(
        &self,
        tenant_id: &TenantId,
        params: &ExecutionParams,
        user_input: &UserInput,
        context: &CaseContext,
        idempotency_key: String,
    ) -> std::result::Result<ConversationReply, ConnectorError> {
        let model_id = Self::resolve_model(params)?;
        let mut messages = Vec::with_capacity(2);
        if !context.as_ref().is_null()
            && context.as_ref() != &serde_json::Value::Object(serde_json::Map::new())
        {
            messages.push(ChatMessage::system(format!(
                "Use the following context when answering.\n{}",
                context.as_ref()
            )));
        }
        messages.push(ChatMessage::user(user_input.as_ref()));

        let response = self
            .connector
            .invoke(InvokeRequest {
                model_id,
                messages,
                parameters: params.as_ref().clone(),
                timeout: self.timeout,
                idempotency_key,
                tenant_id: tenant_id.clone(),
            })
            .await?;

        let text = SystemResponse::try_new(response.text)
            .map_err(|_| ConnectorError::Transport("oversized system response".to_string()))?;
        Ok(ConversationReply {
            text,
            latency_ms: response.latency_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{InvokeResponse, TokenUsage};
    use crate::domain::{CostCents, TokenCount};
    use parking_lot::Mutex;

    /// Connector double recording every request it sees
    struct RecordingConnector {
        requests: Mutex<Vec<InvokeRequest>>,
    }

    #[async_trait]
    impl ModelConnector for RecordingConnector {
        async fn invoke(
            &self,
            request: InvokeRequest,
        ) -> std::result::Result<InvokeResponse, ConnectorError> {
            self.requests.lock().push(request);
            Ok(InvokeResponse {
                text: "a reply".to_string(),
                usage: TokenUsage {
                    input_tokens: TokenCount::try_new(1).unwrap(),
                    output_tokens: TokenCount::try_new(1).unwrap(),
                    cost_cents: CostCents::try_new(0).unwrap(),
                },
                latency_ms: LatencyMs::from(9),
            })
        }
    }

    #[tokio::test]
    async fn spec_id_addresses_the_model() {
        let connector = Arc::new(RecordingConnector {
            requests: Mutex::new(Vec::new()),
        });
        let conversation =
            ModelBackedConversation::new(Arc::clone(&connector), Duration::from_secs(5));
        let params = ExecutionParams::new(serde_json::json!({
            "conversation_spec_id": "support-bot-v2"
        }));

        let reply = conversation
            .converse(
                &TenantId::generate(),
                &params,
                &UserInput::try_new("hi".to_string()).unwrap(),
                &CaseContext::default(),
                "exec:case".to_string(),
            )
            .await
            .unwrap();

        assert_eq!(reply.text.as_ref(), "a reply");
        let seen = connector.requests.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].model_id.as_ref(), "support-bot-v2");
        assert_eq!(seen[0].idempotency_key, "exec:case");
    }

    #[tokio::test]
    async fn context_is_passed_as_a_system_message() {
        let connector = Arc::new(RecordingConnector {
            requests: Mutex::new(Vec::new()),
        });
        let conversation =
            ModelBackedConversation::new(Arc::clone(&connector), Duration::from_secs(5));
        let context = CaseContext::new(serde_json::json!({"facts": ["sky is blue"]}));

        conversation
            .converse(
                &TenantId::generate(),
                &ExecutionParams::default(),
                &UserInput::try_new("what color is the sky".to_string()).unwrap(),
                &context,
                "k".to_string(),
            )
            .await
            .unwrap();

        let seen = connector.requests.lock();
        assert_eq!(seen[0].messages.len(), 2);
        assert!(seen[0].messages[0].content.contains("sky is blue"));
    }
}
