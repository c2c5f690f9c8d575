//! Gemini `generateContent` adapter (static key via `x-goog-api-key`).

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use rcc_protocol::gemini::{
    Content, GenerateContentRequest, GenerateContentResponse, GenerationConfig,
};
use rcc_protocol::openai::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, Choice, FinishReason, Role, Usage,
    CHAT_COMPLETION_OBJECT,
};
use rcc_provider_core::{
    AdapterError, AdapterResult, AuthMethod, CallContext, Capabilities, HttpRequest, HttpResponse,
    HttpTransport, ProviderAdapter, ProviderConfig, ProviderKind, header_set,
};

use crate::auth::{join_url, parse_retry_after, set_accept_json, set_content_type_json};
use crate::providers::{gen_response_id, unix_now};

pub struct GeminiAdapter {
    id: String,
    endpoint: String,
    keys: Vec<String>,
    transport: Arc<dyn HttpTransport>,
}

impl GeminiAdapter {
    pub fn from_config(
        config: &ProviderConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, String> {
        if config.auth.method != AuthMethod::ApiKey {
            return Err("gemini adapters take apiKey auth".to_string());
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
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn provider_id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            streaming: false,
            tools: false,
            vision: true,
        }
    }

    async fn execute(
        &self,
        ctx: &CallContext,
        req: ChatCompletionRequest,
    ) -> AdapterResult<ChatCompletionResponse> {
        let upstream = to_generate_request(&req)?;
        let body =
            serde_json::to_vec(&upstream).map_err(|err| AdapterError::decode(err.to_string()))?;
        let path = format!("/v1beta/models/{}:generateContent", ctx.model);
        let mut http = HttpRequest::post(join_url(&self.endpoint, &path), Bytes::from(body));
        header_set(&mut http.headers, "x-goog-api-key", self.key(ctx.key_index)?);
        set_accept_json(&mut http.headers);
        set_content_type_json(&mut http.headers);

        let resp = self.transport.send(http).await.map_err(AdapterError::from)?;
        if !resp.is_success() {
            return Err(error_from_response(&resp));
        }
        let decoded: GenerateContentResponse = serde_json::from_slice(&resp.body)
            .map_err(|err| AdapterError::decode(err.to_string()))?;
        Ok(from_generate_response(&req.model, decoded))
    }

    async fn health_check(&self, ctx: &CallContext) -> AdapterResult<()> {
        let mut http = HttpRequest::get(join_url(&self.endpoint, "/v1beta/models?pageSize=1"));
        header_set(&mut http.headers, "x-goog-api-key", self.key(ctx.key_index)?);
        set_accept_json(&mut http.headers);
        let resp = self.transport.send(http).await.map_err(AdapterError::from)?;
        if resp.is_success() {
            Ok(())
        } else {
            Err(error_from_response(&resp))
        }
    }
}

fn error_from_response(resp: &HttpResponse) -> AdapterError {
    // Google error envelope: {"error": {"code": ..., "message": ..., "status": ...}}
    let message = serde_json::from_slice::<serde_json::Value>(&resp.body)
        .ok()
        .and_then(|v| {
            v.get("error")?
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
        });
    AdapterError::from_status(resp.status, false, message, parse_retry_after(&resp.headers))
}

fn to_generate_request(req: &ChatCompletionRequest) -> AdapterResult<GenerateContentRequest> {
    if req.tools.as_ref().is_some_and(|t| !t.is_empty()) {
        return Err(AdapterError::unsupported("function calling"));
    }
    let mut system_parts: Vec<&str> = Vec::new();
    let mut contents: Vec<Content> = Vec::new();
    for msg in &req.messages {
        let text = msg.content.clone().unwrap_or_default();
        match msg.role {
            Role::System => {
                if let Some(content) = &msg.content {
                    system_parts.push(content);
                }
            }
            Role::User => contents.push(Content::text(Some("user"), text)),
            Role::Assistant => contents.push(Content::text(Some("model"), text)),
            Role::Tool => return Err(AdapterError::unsupported("tool messages")),
        }
    }
    let generation_config = GenerationConfig {
        temperature: req.temperature,
        top_p: req.top_p,
        max_output_tokens: req.max_tokens,
        stop_sequences: req.stop.clone(),
    };
    Ok(GenerateContentRequest {
        contents,
        system_instruction: if system_parts.is_empty() {
            None
        } else {
            Some(Content::text(None, system_parts.join("\n\n")))
        },
        generation_config: Some(generation_config),
    })
}

fn from_generate_response(model: &str, resp: GenerateContentResponse) -> ChatCompletionResponse {
    let choices = resp
        .candidates
        .into_iter()
        .enumerate()
        .map(|(index, candidate)| {
            let text: String = candidate
                .content
                .parts
                .iter()
                .filter_map(|part| part.text.as_deref())
                .collect();
            Choice {
                index: candidate.index.unwrap_or(index as u32),
                message: ChatMessage::text(Role::Assistant, text),
                finish_reason: match candidate.finish_reason.as_deref() {
                    Some("STOP") => Some(FinishReason::Stop),
                    Some("MAX_TOKENS") => Some(FinishReason::Length),
                    Some("SAFETY") => Some(FinishReason::ContentFilter),
                    _ => None,
                },
            }
        })
        .collect();
    let usage = resp.usage_metadata.unwrap_or_default();
    ChatCompletionResponse {
        id: gen_response_id("chatcmpl"),
        object: CHAT_COMPLETION_OBJECT.to_string(),
        created: unix_now(),
        model: model.to_string(),
        choices,
        usage: Usage {
            prompt_tokens: usage.prompt_token_count,
            completion_tokens: usage.candidates_token_count,
            total_tokens: usage.total_token_count,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedTransport, ctx_for, sample_request};
    use rcc_provider_core::header_get;

    fn adapter(transport: Arc<ScriptedTransport>) -> GeminiAdapter {
        GeminiAdapter {
            id: "gem".to_string(),
            endpoint: "https://generativelanguage.example".to_string(),
            keys: vec!["gk-1".to_string()],
            transport,
        }
    }

    #[tokio::test]
    async fn request_lands_on_the_model_specific_path() {
        let transport = Arc::new(ScriptedTransport::replying_json(
            200,
            r#"{
                "candidates": [{"content":{"role":"model","parts":[{"text":"ok"}]},"finishReason":"STOP"}],
                "usageMetadata": {"promptTokenCount":3,"candidatesTokenCount":1,"totalTokenCount":4}
            }"#,
        ));
        let adapter = adapter(transport.clone());

        let resp = adapter
            .execute(
                &ctx_for("gem", "gemini-1.5-pro", 0),
                sample_request("gemini-1.5-pro"),
            )
            .await
            .unwrap();

        let sent = transport.last_request().unwrap();
        assert!(sent
            .url
            .ends_with("/v1beta/models/gemini-1.5-pro:generateContent"));
        assert_eq!(header_get(&sent.headers, "x-goog-api-key"), Some("gk-1"));
        let body: serde_json::Value = serde_json::from_slice(sent.body.as_ref().unwrap()).unwrap();
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be brief");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 64);

        assert_eq!(resp.usage.total_tokens, 4);
        assert_eq!(resp.choices[0].finish_reason, Some(FinishReason::Stop));
        assert!(resp.id.starts_with("chatcmpl-"));
    }

    #[tokio::test]
    async fn google_error_envelope_is_normalised() {
        let transport = Arc::new(ScriptedTransport::replying_json(
            400,
            r#"{"error":{"code":400,"message":"Invalid JSON payload","status":"INVALID_ARGUMENT"}}"#,
        ));
        let adapter = adapter(transport);
        let err = adapter
            .execute(
                &ctx_for("gem", "gemini-1.5-pro", 0),
                sample_request("gemini-1.5-pro"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, rcc_provider_core::AdapterErrorKind::InvalidRequest);
        assert_eq!(err.provider_message.as_deref(), Some("Invalid JSON payload"));
    }
}
