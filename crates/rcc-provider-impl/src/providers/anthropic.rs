//! Anthropic Messages adapter.
//!
//! Canonical chat requests become `/v1/messages` bodies: system messages fold
//! into the `system` field, assistant tool calls become `tool_use` blocks, and
//! the response is flattened back into one canonical choice.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use rcc_protocol::anthropic::{
    ContentBlock, CreateMessageRequest, CreateMessageResponse, ErrorBody, Message, MessageContent,
    MessageRole, StopReason, ToolDef,
};
use rcc_protocol::openai::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, Choice, FinishReason, FunctionCall,
    Role, ToolCall, Usage, CHAT_COMPLETION_OBJECT,
};
use rcc_provider_core::{
    AdapterError, AdapterResult, AuthMethod, CallContext, Capabilities, HttpRequest, HttpResponse,
    HttpTransport, ProviderAdapter, ProviderConfig, ProviderKind, header_set,
};

use crate::auth::{join_url, parse_retry_after, set_accept_json, set_content_type_json};
use crate::providers::unix_now;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicAdapter {
    id: String,
    endpoint: String,
    keys: Vec<String>,
    transport: Arc<dyn HttpTransport>,
}

impl AnthropicAdapter {
    pub fn from_config(
        config: &ProviderConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, String> {
        if config.auth.method != AuthMethod::ApiKey {
            return Err("anthropic adapters take apiKey auth".to_string());
        }
        Ok(Self {
            id: config.id.clone(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            keys: config.auth.keys.clone(),
            transport,
        })
    }

    fn key(&self, index: usize) -> AdapterResult<&str> {
        self.keys
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| AdapterError::invalid_key_index(index, self.keys.len()))
    }

    fn auth_headers(&self, req: &mut HttpRequest, key: &str) {
        header_set(&mut req.headers, "x-api-key", key);
        header_set(&mut req.headers, "anthropic-version", ANTHROPIC_VERSION);
        set_accept_json(&mut req.headers);
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn provider_id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            streaming: false,
            tools: true,
            vision: false,
        }
    }

    async fn execute(
        &self,
        ctx: &CallContext,
        req: ChatCompletionRequest,
    ) -> AdapterResult<ChatCompletionResponse> {
        let upstream = to_messages_request(&req)?;
        let body =
            serde_json::to_vec(&upstream).map_err(|err| AdapterError::decode(err.to_string()))?;
        let mut http = HttpRequest::post(join_url(&self.endpoint, "/v1/messages"), Bytes::from(body));
        self.auth_headers(&mut http, self.key(ctx.key_index)?);
        set_content_type_json(&mut http.headers);

        let resp = self.transport.send(http).await.map_err(AdapterError::from)?;
        if !resp.is_success() {
            return Err(error_from_response(&resp));
        }
        let decoded: CreateMessageResponse = serde_json::from_slice(&resp.body)
            .map_err(|err| AdapterError::decode(err.to_string()))?;
        Ok(from_messages_response(decoded))
    }

    async fn health_check(&self, ctx: &CallContext) -> AdapterResult<()> {
        let mut http = HttpRequest::get(join_url(&self.endpoint, "/v1/models"));
        self.auth_headers(&mut http, self.key(ctx.key_index)?);
        let resp = self.transport.send(http).await.map_err(AdapterError::from)?;
        if resp.is_success() {
            Ok(())
        } else {
            Err(error_from_response(&resp))
        }
    }
}

fn error_from_response(resp: &HttpResponse) -> AdapterError {
    let message = serde_json::from_slice::<ErrorBody>(&resp.body)
        .map(|body| body.error.message)
        .ok();
    AdapterError::from_status(resp.status, false, message, parse_retry_after(&resp.headers))
}

fn to_messages_request(req: &ChatCompletionRequest) -> AdapterResult<CreateMessageRequest> {
    let mut system_parts: Vec<&str> = Vec::new();
    let mut messages: Vec<Message> = Vec::new();

    for msg in &req.messages {
        match msg.role {
            Role::System => {
                if let Some(content) = &msg.content {
                    system_parts.push(content);
                }
            }
            Role::User => messages.push(Message {
                role: MessageRole::User,
                content: MessageContent::Text(msg.content.clone().unwrap_or_default()),
            }),
            Role::Assistant => {
                let mut blocks: Vec<ContentBlock> = Vec::new();
                if let Some(content) = &msg.content
                    && !content.is_empty()
                {
                    blocks.push(ContentBlock::Text {
                        text: content.clone(),
                    });
                }
                for call in msg.tool_calls.iter().flatten() {
                    let input = serde_json::from_str(&call.function.arguments)
                        .unwrap_or(serde_json::Value::Null);
                    blocks.push(ContentBlock::ToolUse {
                        id: call.id.clone(),
                        name: call.function.name.clone(),
                        input,
                    });
                }
                messages.push(Message {
                    role: MessageRole::Assistant,
                    content: MessageContent::Blocks(blocks),
                });
            }
            Role::Tool => {
                let Some(tool_call_id) = &msg.tool_call_id else {
                    return Err(AdapterError::new(
                        rcc_provider_core::AdapterErrorKind::InvalidRequest,
                        false,
                    )
                    .with_message("tool message without tool_call_id"));
                };
                messages.push(Message {
                    role: MessageRole::User,
                    content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                        tool_use_id: tool_call_id.clone(),
                        content: msg.content.clone().unwrap_or_default(),
                    }]),
                });
            }
        }
    }

    let tools = req.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|tool| ToolDef {
                name: tool.function.name.clone(),
                description: tool.function.description.clone(),
                input_schema: tool
                    .function
                    .parameters
                    .clone()
                    .unwrap_or_else(|| serde_json::json!({"type": "object"})),
            })
            .collect()
    });

    Ok(CreateMessageRequest {
        model: req.model.clone(),
        max_tokens: req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        messages,
        system: if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        },
        temperature: req.temperature,
        top_p: req.top_p,
        stop_sequences: req.stop.clone(),
        tools,
    })
}

fn from_messages_response(resp: CreateMessageResponse) -> ChatCompletionResponse {
    let mut text = String::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    for block in resp.content {
        match block {
            ContentBlock::Text { text: t } => text.push_str(&t),
            ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id,
                kind: "function".to_string(),
                function: FunctionCall {
                    name,
                    arguments: input.to_string(),
                },
            }),
            ContentBlock::ToolResult { .. } => {}
        }
    }

    let finish_reason = resp.stop_reason.map(|reason| match reason {
        StopReason::EndTurn | StopReason::StopSequence => FinishReason::Stop,
        StopReason::MaxTokens => FinishReason::Length,
        StopReason::ToolUse => FinishReason::ToolCalls,
    });

    let message = ChatMessage {
        role: Role::Assistant,
        content: if text.is_empty() { None } else { Some(text) },
        name: None,
        tool_calls: if tool_calls.is_empty() {
            None
        } else {
            Some(tool_calls)
        },
        tool_call_id: None,
    };

    ChatCompletionResponse {
        id: resp.id,
        object: CHAT_COMPLETION_OBJECT.to_string(),
        created: unix_now(),
        model: resp.model,
        choices: vec![Choice {
            index: 0,
            message,
            finish_reason,
        }],
        usage: Usage {
            prompt_tokens: resp.usage.input_tokens,
            completion_tokens: resp.usage.output_tokens,
            total_tokens: resp.usage.input_tokens + resp.usage.output_tokens,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedTransport, ctx_for, sample_request};
    use rcc_provider_core::header_get;

    fn adapter(transport: Arc<ScriptedTransport>) -> AnthropicAdapter {
        AnthropicAdapter {
            id: "anthropic-main".to_string(),
            endpoint: "https://api.anthropic.example".to_string(),
            keys: vec!["sk-ant".to_string()],
            transport,
        }
    }

    #[tokio::test]
    async fn system_messages_fold_into_system_field() {
        let transport = Arc::new(ScriptedTransport::replying_json(
            200,
            r#"{
                "id": "msg_01", "type": "message", "role": "assistant",
                "model": "claude-3-5-sonnet",
                "content": [{"type":"text","text":"ok"}],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 3, "output_tokens": 1}
            }"#,
        ));
        let adapter = adapter(transport.clone());

        let resp = adapter
            .execute(
                &ctx_for("anthropic-main", "claude-3-5-sonnet", 0),
                sample_request("claude-3-5-sonnet"),
            )
            .await
            .unwrap();

        let sent = transport.last_request().unwrap();
        assert!(sent.url.ends_with("/v1/messages"));
        assert_eq!(header_get(&sent.headers, "x-api-key"), Some("sk-ant"));
        let body: serde_json::Value = serde_json::from_slice(sent.body.as_ref().unwrap()).unwrap();
        assert_eq!(body["system"], "be brief");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["max_tokens"], 64);

        assert_eq!(resp.usage.prompt_tokens, 3);
        assert_eq!(resp.usage.total_tokens, 4);
        assert_eq!(resp.choices[0].finish_reason, Some(FinishReason::Stop));
    }

    #[tokio::test]
    async fn tool_use_blocks_become_tool_calls() {
        let transport = Arc::new(ScriptedTransport::replying_json(
            200,
            r#"{
                "id": "msg_02", "type": "message", "role": "assistant",
                "model": "claude-3-5-sonnet",
                "content": [
                    {"type":"tool_use","id":"toolu_1","name":"get_weather","input":{"city":"Berlin"}}
                ],
                "stop_reason": "tool_use",
                "usage": {"input_tokens": 10, "output_tokens": 5}
            }"#,
        ));
        let adapter = adapter(transport);

        let resp = adapter
            .execute(
                &ctx_for("anthropic-main", "claude-3-5-sonnet", 0),
                sample_request("claude-3-5-sonnet"),
            )
            .await
            .unwrap();
        let calls = resp.choices[0].message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.name, "get_weather");
        assert_eq!(
            resp.choices[0].finish_reason,
            Some(FinishReason::ToolCalls)
        );
    }

    #[tokio::test]
    async fn upstream_error_envelope_is_normalised() {
        let transport = Arc::new(ScriptedTransport::replying_json(
            529,
            r#"{"type":"error","error":{"type":"overloaded_error","message":"overloaded"}}"#,
        ));
        let adapter = adapter(transport);
        let err = adapter
            .execute(
                &ctx_for("anthropic-main", "claude-3-5-sonnet", 0),
                sample_request("claude-3-5-sonnet"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.http_status, Some(529));
        assert!(err.retryable);
        assert_eq!(err.provider_message.as_deref(), Some("overloaded"));
    }
}
