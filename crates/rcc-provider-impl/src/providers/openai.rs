//! OpenAI-compatible adapter: the canonical shape is already the upstream
//! wire format, so translation is a passthrough.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use rcc_protocol::openai::{ChatCompletionRequest, ChatCompletionResponse, ErrorBody};
use rcc_provider_core::{
    AdapterError, AdapterResult, AuthMethod, CallContext, Capabilities, HttpRequest, HttpResponse,
    HttpTransport, ProviderAdapter, ProviderConfig, ProviderKind,
};

use crate::auth::{join_url, parse_retry_after, set_accept_json, set_bearer, set_content_type_json};

pub struct OpenAiAdapter {
    id: String,
    endpoint: String,
    keys: Vec<String>,
    transport: Arc<dyn HttpTransport>,
}

impl OpenAiAdapter {
    pub fn from_config(
        config: &ProviderConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, String> {
        if config.auth.method != AuthMethod::ApiKey {
            return Err("openai adapters take apiKey auth".to_string());
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
impl ProviderAdapter for OpenAiAdapter {
    fn provider_id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAI
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
        // The scheduler contract is unary.
        req.stream = None;
        let body =
            serde_json::to_vec(&req).map_err(|err| AdapterError::decode(err.to_string()))?;
        let mut http =
            HttpRequest::post(join_url(&self.endpoint, "/v1/chat/completions"), Bytes::from(body));
        set_bearer(&mut http.headers, self.key(ctx.key_index)?);
        set_accept_json(&mut http.headers);
        set_content_type_json(&mut http.headers);

        let resp = self.transport.send(http).await.map_err(AdapterError::from)?;
        if !resp.is_success() {
            return Err(error_from_response(&resp, false));
        }
        serde_json::from_slice(&resp.body).map_err(|err| AdapterError::decode(err.to_string()))
    }

    async fn health_check(&self, ctx: &CallContext) -> AdapterResult<()> {
        let mut http = HttpRequest::get(join_url(&self.endpoint, "/v1/models"));
        set_bearer(&mut http.headers, self.key(ctx.key_index)?);
        set_accept_json(&mut http.headers);
        let resp = self.transport.send(http).await.map_err(AdapterError::from)?;
        if resp.is_success() {
            Ok(())
        } else {
            Err(error_from_response(&resp, false))
        }
    }
}

/// Shared by every adapter speaking the OpenAI error envelope.
pub(crate) fn error_from_response(resp: &HttpResponse, oauth: bool) -> AdapterError {
    let message = serde_json::from_slice::<ErrorBody>(&resp.body)
        .map(|body| body.error.message)
        .ok();
    AdapterError::from_status(resp.status, oauth, message, parse_retry_after(&resp.headers))
}
