//! Qwen (DashScope) adapter with OAuth2 device-flow credentials.
//!
//! Field mapping on the way back: `request_id → id`, `output.choices →
//! choices`, `input_tokens/output_tokens → prompt/completion_tokens`.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use rcc_protocol::openai::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, Choice, FinishReason, Role, Usage,
    CHAT_COMPLETION_OBJECT,
};
use rcc_protocol::qwen::{
    ErrorBody, GenerationInput, GenerationParameters, GenerationRequest, GenerationResponse,
    QwenMessage,
};
use rcc_provider_core::{
    AdapterError, AdapterResult, AuthMethod, AuthStatus, CallContext, Capabilities, HttpRequest,
    HttpResponse, HttpTransport, ProviderAdapter, ProviderConfig, ProviderKind,
};

use crate::auth::{join_url, parse_retry_after, set_accept_json, set_bearer, set_content_type_json};
use crate::oauth::{AuthSource, DeviceFlowAuth, DeviceFlowConfig, TokenStore};
use crate::providers::unix_now;

const GENERATION_PATH: &str = "/api/v1/services/aigc/text-generation/generation";
const MODELS_PATH: &str = "/api/v1/models";
const DEFAULT_CLIENT_ID: &str = "rcc-router";
const DEFAULT_SCOPE: &str = "model.completion";

pub struct QwenAdapter {
    id: String,
    endpoint: String,
    auth: AuthSource,
    transport: Arc<dyn HttpTransport>,
}

impl QwenAdapter {
    pub fn from_config(
        config: &ProviderConfig,
        transport: Arc<dyn HttpTransport>,
        tokens: Arc<dyn TokenStore>,
    ) -> Result<Self, String> {
        let auth = match config.auth.method {
            AuthMethod::ApiKey => AuthSource::Static(config.auth.keys.clone()),
            AuthMethod::OAuth2Device => {
                let flow = DeviceFlowConfig {
                    client_id: config
                        .auth
                        .client_id
                        .clone()
                        .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
                    token_url: config
                        .auth
                        .token_url
                        .clone()
                        .ok_or_else(|| "oauth2-device auth requires tokenUrl".to_string())?,
                    device_code_url: config
                        .auth
                        .device_code_url
                        .clone()
                        .ok_or_else(|| "oauth2-device auth requires deviceCodeUrl".to_string())?,
                    scope: config
                        .auth
                        .scope
                        .clone()
                        .unwrap_or_else(|| DEFAULT_SCOPE.to_string()),
                };
                AuthSource::Device(DeviceFlowAuth::new(
                    config.id.clone(),
                    flow,
                    transport.clone(),
                    tokens,
                ))
            }
        };
        Ok(Self {
            id: config.id.clone(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            auth,
            transport,
        })
    }

    fn error_from_response(&self, resp: &HttpResponse) -> AdapterError {
        let message = serde_json::from_slice::<ErrorBody>(&resp.body)
            .map(|body| body.message)
            .ok();
        AdapterError::from_status(
            resp.status,
            self.auth.is_oauth(),
            message,
            parse_retry_after(&resp.headers),
        )
    }
}

#[async_trait]
impl ProviderAdapter for QwenAdapter {
    fn provider_id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Qwen
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            streaming: false,
            tools: false,
            vision: false,
        }
    }

    async fn execute(
        &self,
        ctx: &CallContext,
        req: ChatCompletionRequest,
    ) -> AdapterResult<ChatCompletionResponse> {
        let upstream = to_generation_request(&req)?;
        let body =
            serde_json::to_vec(&upstream).map_err(|err| AdapterError::decode(err.to_string()))?;
        let mut http =
            HttpRequest::post(join_url(&self.endpoint, GENERATION_PATH), Bytes::from(body));
        set_bearer(&mut http.headers, &self.auth.bearer(ctx.key_index).await?);
        set_accept_json(&mut http.headers);
        set_content_type_json(&mut http.headers);

        let resp = self.transport.send(http).await.map_err(AdapterError::from)?;
        if !resp.is_success() {
            return Err(self.error_from_response(&resp));
        }
        let decoded: GenerationResponse = serde_json::from_slice(&resp.body)
            .map_err(|err| AdapterError::decode(err.to_string()))?;
        Ok(from_generation_response(&req.model, decoded))
    }

    async fn health_check(&self, ctx: &CallContext) -> AdapterResult<()> {
        let mut http = HttpRequest::get(join_url(&self.endpoint, MODELS_PATH));
        set_bearer(&mut http.headers, &self.auth.bearer(ctx.key_index).await?);
        set_accept_json(&mut http.headers);
        let resp = self.transport.send(http).await.map_err(AdapterError::from)?;
        if resp.is_success() {
            Ok(())
        } else {
            Err(self.error_from_response(&resp))
        }
    }

    fn auth_status(&self) -> AuthStatus {
        self.auth.status()
    }

    async fn refresh_auth(&self, ctx: &CallContext) -> AdapterResult<()> {
        self.auth.refresh(ctx.key_index).await
    }
}

fn to_generation_request(req: &ChatCompletionRequest) -> AdapterResult<GenerationRequest> {
    if req.tools.as_ref().is_some_and(|t| !t.is_empty()) {
        return Err(AdapterError::unsupported("function calling"));
    }
    let mut messages = Vec::with_capacity(req.messages.len());
    for msg in &req.messages {
        let role = match msg.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => return Err(AdapterError::unsupported("tool messages")),
        };
        messages.push(QwenMessage {
            role: role.to_string(),
            content: msg.content.clone().unwrap_or_default(),
        });
    }
    Ok(GenerationRequest {
        model: req.model.clone(),
        input: GenerationInput { messages },
        parameters: GenerationParameters {
            result_format: "message".to_string(),
            temperature: req.temperature,
            top_p: req.top_p,
            max_tokens: req.max_tokens,
            stop: req.stop.clone(),
        },
    })
}

fn from_generation_response(model: &str, resp: GenerationResponse) -> ChatCompletionResponse {
    let choices = resp
        .output
        .choices
        .into_iter()
        .enumerate()
        .map(|(index, choice)| Choice {
            index: index as u32,
            message: ChatMessage::text(Role::Assistant, choice.message.content),
            finish_reason: match choice.finish_reason.as_deref() {
                Some("stop") => Some(FinishReason::Stop),
                Some("length") => Some(FinishReason::Length),
                _ => None,
            },
        })
        .collect();
    let usage = Usage {
        prompt_tokens: resp.usage.input_tokens,
        completion_tokens: resp.usage.output_tokens,
        total_tokens: resp
            .usage
            .total_tokens
            .unwrap_or(resp.usage.input_tokens + resp.usage.output_tokens),
    };
    ChatCompletionResponse {
        id: resp.request_id,
        object: CHAT_COMPLETION_OBJECT.to_string(),
        created: unix_now(),
        model: model.to_string(),
        choices,
        usage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::{MemoryTokenStore, OAuthToken};
    use crate::test_support::{ScriptedTransport, ctx_for, sample_request};
    use rcc_provider_core::{AdapterErrorKind, header_get};
    use std::time::{Duration, SystemTime};

    fn oauth_adapter(
        transport: Arc<ScriptedTransport>,
        store: Arc<MemoryTokenStore>,
    ) -> QwenAdapter {
        let flow = DeviceFlowConfig {
            client_id: "rcc-router".to_string(),
            token_url: "https://auth.qwen.example/token".to_string(),
            device_code_url: "https://auth.qwen.example/device".to_string(),
            scope: "model.completion".to_string(),
        };
        QwenAdapter {
            id: "qwen-main".to_string(),
            endpoint: "https://dashscope.example".to_string(),
            auth: AuthSource::Device(DeviceFlowAuth::new(
                "qwen-main",
                flow,
                transport.clone(),
                store,
            )),
            transport,
        }
    }

    fn fresh_token() -> OAuthToken {
        OAuthToken {
            access_token: "tok-live".to_string(),
            refresh_token: Some("refresh-1".to_string()),
            expires_at: Some(SystemTime::now() + Duration::from_secs(3600)),
        }
    }

    #[tokio::test]
    async fn translates_request_and_response_shapes() {
        let store = Arc::new(MemoryTokenStore::new());
        store.seed("qwen-main", 0, fresh_token());
        let transport = Arc::new(ScriptedTransport::replying_json(
            200,
            r#"{
                "request_id": "req-abc",
                "output": {"choices":[{"message":{"role":"assistant","content":"ok"},"finish_reason":"stop"}]},
                "usage": {"input_tokens": 3, "output_tokens": 1, "total_tokens": 4}
            }"#,
        ));
        let adapter = oauth_adapter(transport.clone(), store);

        let resp = adapter
            .execute(&ctx_for("qwen-main", "qwen-max", 0), sample_request("qwen-max"))
            .await
            .unwrap();

        let sent = transport.last_request().unwrap();
        assert!(sent.url.ends_with(GENERATION_PATH));
        assert_eq!(
            header_get(&sent.headers, "authorization"),
            Some("Bearer tok-live")
        );
        let body: serde_json::Value = serde_json::from_slice(sent.body.as_ref().unwrap()).unwrap();
        assert_eq!(body["parameters"]["result_format"], "message");
        assert_eq!(body["input"]["messages"][0]["role"], "system");

        assert_eq!(resp.id, "req-abc");
        assert_eq!(resp.usage.prompt_tokens, 3);
        assert_eq!(resp.choices[0].finish_reason, Some(FinishReason::Stop));
    }

    #[tokio::test]
    async fn upstream_401_reports_auth_expired_for_oauth() {
        let store = Arc::new(MemoryTokenStore::new());
        store.seed("qwen-main", 0, fresh_token());
        let transport = Arc::new(ScriptedTransport::replying_json(
            401,
            r#"{"code":"InvalidApiKey","message":"token expired"}"#,
        ));
        let adapter = oauth_adapter(transport, store);

        let err = adapter
            .execute(&ctx_for("qwen-main", "qwen-max", 0), sample_request("qwen-max"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::AuthExpired);
        assert_eq!(err.provider_message.as_deref(), Some("token expired"));
    }

    #[tokio::test]
    async fn refresh_auth_rotates_the_stored_token() {
        let store = Arc::new(MemoryTokenStore::new());
        store.seed(
            "qwen-main",
            0,
            OAuthToken {
                access_token: "tok-old".to_string(),
                refresh_token: Some("refresh-1".to_string()),
                expires_at: Some(SystemTime::now() + Duration::from_secs(3600)),
            },
        );
        let transport = Arc::new(ScriptedTransport::replying_json(
            200,
            r#"{"access_token":"tok-new","expires_in":3600}"#,
        ));
        let adapter = oauth_adapter(transport.clone(), store.clone());

        adapter
            .refresh_auth(&ctx_for("qwen-main", "qwen-max", 0))
            .await
            .unwrap();

        let sent = transport.last_request().unwrap();
        let form = String::from_utf8(sent.body.unwrap().to_vec()).unwrap();
        assert!(form.contains("grant_type=refresh_token"));
        assert!(form.contains("refresh_token=refresh-1"));

        let stored = store.load("qwen-main", 0).unwrap();
        assert_eq!(stored.access_token, "tok-new");
        // Rotation without a new refresh token keeps the old one.
        assert_eq!(stored.refresh_token.as_deref(), Some("refresh-1"));
    }

    #[tokio::test]
    async fn refresh_without_stored_credentials_fails() {
        let store = Arc::new(MemoryTokenStore::new());
        let transport = Arc::new(ScriptedTransport::new(Vec::new()));
        let adapter = oauth_adapter(transport, store);
        let err = adapter
            .refresh_auth(&ctx_for("qwen-main", "qwen-max", 0))
            .await
            .unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::AuthExpired);
    }
}
