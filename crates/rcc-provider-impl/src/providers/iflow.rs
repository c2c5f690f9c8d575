//! iFlow adapter: OpenAI-compatible wire format behind OAuth2 device-flow
//! bearer auth.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use rcc_protocol::openai::{ChatCompletionRequest, ChatCompletionResponse};
use rcc_provider_core::{
    AdapterError, AdapterResult, AuthMethod, AuthStatus, CallContext, Capabilities, HttpRequest,
    HttpResponse, HttpTransport, ProviderAdapter, ProviderConfig, ProviderKind,
};

use crate::auth::{join_url, parse_retry_after, set_accept_json, set_bearer, set_content_type_json};
use crate::oauth::{AuthSource, DeviceFlowAuth, DeviceFlowConfig, TokenStore};

const DEFAULT_CLIENT_ID: &str = "rcc-router";
const DEFAULT_SCOPE: &str = "openapi";

pub struct IFlowAdapter {
    id: String,
    endpoint: String,
    auth: AuthSource,
    transport: Arc<dyn HttpTransport>,
}

impl IFlowAdapter {
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
        let message = serde_json::from_slice::<rcc_protocol::openai::ErrorBody>(&resp.body)
            .map(|body| body.error.message)
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
impl ProviderAdapter for IFlowAdapter {
    fn provider_id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::IFlow
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
        mut req: ChatCompletionRequest,
    ) -> AdapterResult<ChatCompletionResponse> {
        req.stream = None;
        let body =
            serde_json::to_vec(&req).map_err(|err| AdapterError::decode(err.to_string()))?;
        let mut http =
            HttpRequest::post(join_url(&self.endpoint, "/v1/chat/completions"), Bytes::from(body));
        set_bearer(&mut http.headers, &self.auth.bearer(ctx.key_index).await?);
        set_accept_json(&mut http.headers);
        set_content_type_json(&mut http.headers);

        let resp = self.transport.send(http).await.map_err(AdapterError::from)?;
        if !resp.is_success() {
            return Err(self.error_from_response(&resp));
        }
        serde_json::from_slice(&resp.body).map_err(|err| AdapterError::decode(err.to_string()))
    }

    async fn health_check(&self, ctx: &CallContext) -> AdapterResult<()> {
        let mut http = HttpRequest::get(join_url(&self.endpoint, "/v1/models"));
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::{MemoryTokenStore, OAuthToken};
    use crate::test_support::{ScriptedTransport, ctx_for, sample_request};
    use rcc_provider_core::header_get;
    use std::time::{Duration, SystemTime};

    #[tokio::test]
    async fn bearer_comes_from_the_device_flow_token() {
        let store = Arc::new(MemoryTokenStore::new());
        store.seed(
            "iflow-main",
            0,
            OAuthToken {
                access_token: "tok-iflow".to_string(),
                refresh_token: None,
                expires_at: Some(SystemTime::now() + Duration::from_secs(3600)),
            },
        );
        let transport = Arc::new(ScriptedTransport::replying_json(
            200,
            r#"{
                "id": "chatcmpl-9", "object": "chat.completion", "created": 1,
                "model": "tstars-2",
                "choices": [{"index":0,"message":{"role":"assistant","content":"ok"},"finish_reason":"stop"}],
                "usage": {"prompt_tokens":3,"completion_tokens":1,"total_tokens":4}
            }"#,
        ));
        let flow = DeviceFlowConfig {
            client_id: "rcc-router".to_string(),
            token_url: "https://auth.iflow.example/token".to_string(),
            device_code_url: "https://auth.iflow.example/device".to_string(),
            scope: "openapi".to_string(),
        };
        let adapter = IFlowAdapter {
            id: "iflow-main".to_string(),
            endpoint: "https://api.iflow.example".to_string(),
            auth: AuthSource::Device(DeviceFlowAuth::new(
                "iflow-main",
                flow,
                transport.clone(),
                store,
            )),
            transport: transport.clone(),
        };

        let resp = adapter
            .execute(&ctx_for("iflow-main", "tstars-2", 0), sample_request("tstars-2"))
            .await
            .unwrap();
        assert_eq!(resp.id, "chatcmpl-9");

        let sent = transport.last_request().unwrap();
        assert_eq!(
            header_get(&sent.headers, "authorization"),
            Some("Bearer tok-iflow")
        );
    }
}
