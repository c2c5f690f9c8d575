//! Scripted adapter + fixtures shared by the core integration tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use rcc_core::classify::ErrorClassifier;
use rcc_core::pipeline::Pipeline;
use rcc_core::pool::PipelinePool;
use rcc_core::scheduler::{SchedulerLimits, VirtualModelScheduler};
use rcc_core::tracker::PipelineTracker;
use rcc_protocol::openai::{
    CHAT_COMPLETION_OBJECT, ChatCompletionRequest, ChatCompletionResponse, ChatMessage, Choice,
    FinishReason, Role, Usage,
};
use rcc_provider_core::{
    AdapterError, AdapterResult, AuthState, AuthStatus, CallContext, Capabilities, EventHub,
    ProviderAdapter, ProviderKind, SchedulerConfig, SelectionStrategy,
};

#[allow(dead_code)]
pub enum Step {
    Succeed {
        content: &'static str,
    },
    Fail(AdapterError),
    SleepThenSucceed {
        delay: Duration,
        content: &'static str,
    },
}

/// Adapter that plays back a script. Once the script is exhausted every call
/// succeeds, which keeps "second request" assertions simple.
pub struct ScriptedAdapter {
    id: String,
    kind: ProviderKind,
    oauth: bool,
    steps: Mutex<VecDeque<Step>>,
    refresh_results: Mutex<VecDeque<AdapterResult<()>>>,
    pub executions: AtomicUsize,
    pub refreshes: AtomicUsize,
}

#[allow(dead_code)]
impl ScriptedAdapter {
    pub fn new(id: &str, steps: Vec<Step>) -> Self {
        Self {
            id: id.to_string(),
            kind: ProviderKind::OpenAI,
            oauth: false,
            steps: Mutex::new(steps.into()),
            refresh_results: Mutex::new(VecDeque::new()),
            executions: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
        }
    }

    pub fn oauth(id: &str, steps: Vec<Step>, refreshes: Vec<AdapterResult<()>>) -> Self {
        Self {
            id: id.to_string(),
            kind: ProviderKind::Qwen,
            oauth: true,
            steps: Mutex::new(steps.into()),
            refresh_results: Mutex::new(refreshes.into()),
            executions: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
        }
    }

    pub fn executed(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    pub fn refreshed(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    fn response(model: &str, content: &str) -> ChatCompletionResponse {
        ChatCompletionResponse {
            id: "chatcmpl-test".to_string(),
            object: CHAT_COMPLETION_OBJECT.to_string(),
            created: 1,
            model: model.to_string(),
            choices: vec![Choice {
                index: 0,
                message: ChatMessage::text(Role::Assistant, content),
                finish_reason: Some(FinishReason::Stop),
            }],
            usage: Usage {
                prompt_tokens: 3,
                completion_tokens: 1,
                total_tokens: 4,
            },
        }
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn provider_id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    async fn execute(
        &self,
        ctx: &CallContext,
        _req: ChatCompletionRequest,
    ) -> AdapterResult<ChatCompletionResponse> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            None | Some(Step::Succeed { content: "" }) => Ok(Self::response(&ctx.model, "ok")),
            Some(Step::Succeed { content }) => Ok(Self::response(&ctx.model, content)),
            Some(Step::Fail(err)) => Err(err),
            Some(Step::SleepThenSucceed { delay, content }) => {
                tokio::time::sleep(delay).await;
                Ok(Self::response(&ctx.model, content))
            }
        }
    }

    async fn health_check(&self, _ctx: &CallContext) -> AdapterResult<()> {
        Ok(())
    }

    fn auth_status(&self) -> AuthStatus {
        if self.oauth {
            AuthStatus {
                state: AuthState::Valid,
                expires_at: None,
            }
        } else {
            AuthStatus::static_key()
        }
    }

    async fn refresh_auth(&self, _ctx: &CallContext) -> AdapterResult<()> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        self.refresh_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }
}

#[allow(dead_code)]
pub fn upstream_error(status: u16, retry_after_secs: Option<u64>) -> AdapterError {
    let mut err = AdapterError::from_status(status, false, None, None);
    err.retry_after = retry_after_secs.map(Duration::from_secs);
    err
}

#[allow(dead_code)]
pub fn oauth_401() -> AdapterError {
    AdapterError::from_status(401, true, Some("token expired".into()), None)
}

#[allow(dead_code)]
pub fn pipeline_for(
    vm: &str,
    provider: &str,
    index: usize,
    weight: u32,
    adapter: Arc<ScriptedAdapter>,
) -> Arc<Pipeline> {
    Arc::new(Pipeline::new(
        vm,
        provider,
        "test-model",
        0,
        weight,
        index,
        adapter,
    ))
}

#[allow(dead_code)]
pub fn pool_for(
    vm: &str,
    strategy: SelectionStrategy,
    pipelines: Vec<Arc<Pipeline>>,
) -> Arc<PipelinePool> {
    Arc::new(PipelinePool::new(
        vm,
        pipelines,
        strategy,
        EventHub::new(64),
    ))
}

#[allow(dead_code)]
pub fn limits(max_concurrent: usize, timeout: Duration, hops: u32) -> SchedulerLimits {
    SchedulerLimits {
        max_concurrent_requests: max_concurrent,
        request_timeout: timeout,
        max_failover_hops: hops,
        selection_strategy: SelectionStrategy::PriorityFirst,
    }
}

#[allow(dead_code)]
pub fn scheduler_for(pool: Arc<PipelinePool>, limits: SchedulerLimits) -> VirtualModelScheduler {
    // Tight back-off so retry paths stay fast under test.
    let config = SchedulerConfig {
        retry_base_delay_ms: 10,
        retry_max_delay_ms: 50,
        ..SchedulerConfig::default()
    };
    let classifier = Arc::new(ErrorClassifier::new(&[], &config));
    let hub = EventHub::new(64);
    let tracker = PipelineTracker::new("test-session", hub);
    VirtualModelScheduler::new(pool, limits, classifier, tracker)
}

#[allow(dead_code)]
pub fn chat_request(model: &str) -> ChatCompletionRequest {
    ChatCompletionRequest {
        model: model.to_string(),
        messages: vec![ChatMessage::text(Role::User, "hi")],
        temperature: None,
        top_p: None,
        max_tokens: None,
        stop: None,
        stream: None,
        tools: None,
        tool_choice: None,
        user: None,
    }
}
