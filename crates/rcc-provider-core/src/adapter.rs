use std::time::SystemTime;

use async_trait::async_trait;

use rcc_protocol::openai::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse};

use crate::config::ProviderKind;
use crate::errors::{AdapterError, AdapterResult};

pub type ChunkStream = tokio::sync::mpsc::Receiver<ChatCompletionChunk>;

/// Per-call context handed to an adapter. The pipeline fills in the target
/// model and credential index; the scheduler fills in request identity.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub request_id: String,
    pub trace_id: Option<String>,
    pub virtual_model: String,
    pub provider: String,
    pub model: String,
    pub key_index: usize,
    pub attempt_no: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub streaming: bool,
    pub tools: bool,
    pub vision: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// Static API key; nothing to refresh.
    Static,
    Valid,
    Expiring,
    Expired,
}

#[derive(Debug, Clone, Copy)]
pub struct AuthStatus {
    pub state: AuthState,
    pub expires_at: Option<SystemTime>,
}

impl AuthStatus {
    pub fn static_key() -> Self {
        Self {
            state: AuthState::Static,
            expires_at: None,
        }
    }
}

/// Uniform capability surface over one upstream LLM API.
///
/// Adapters own auth material, request/response shape translation, and error
/// normalisation into [`AdapterError`]. Instances are shared across concurrent
/// calls; each call carries its own credential index in the context.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider_id(&self) -> &str;

    fn kind(&self) -> ProviderKind;

    fn capabilities(&self) -> Capabilities;

    /// One-shot chat completion in the canonical shape.
    async fn execute(
        &self,
        ctx: &CallContext,
        req: ChatCompletionRequest,
    ) -> AdapterResult<ChatCompletionResponse>;

    /// Optional streaming variant. The default reports the capability gap and
    /// the scheduler falls back to `execute`.
    async fn stream_execute(
        &self,
        _ctx: &CallContext,
        _req: ChatCompletionRequest,
    ) -> AdapterResult<ChunkStream> {
        Err(AdapterError::unsupported("streaming"))
    }

    /// Cheap liveness probe. Must not cost a chargeable API call.
    async fn health_check(&self, ctx: &CallContext) -> AdapterResult<()>;

    fn auth_status(&self) -> AuthStatus {
        AuthStatus::static_key()
    }

    /// Force a credential refresh. Only meaningful for OAuth adapters; the
    /// default reports the capability gap.
    async fn refresh_auth(&self, _ctx: &CallContext) -> AdapterResult<()> {
        Err(AdapterError::unsupported("auth refresh"))
    }

    async fn start(&self) -> AdapterResult<()> {
        Ok(())
    }

    async fn stop(&self) {}
}
