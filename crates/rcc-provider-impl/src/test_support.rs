//! Scripted transport and fixtures for adapter tests.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use bytes::Bytes;

use rcc_protocol::openai::{ChatCompletionRequest, ChatMessage, Role};
use rcc_provider_core::{
    CallContext, Headers, HttpRequest, HttpResponse, HttpTransport, TransportError,
};

type Reply = Result<HttpResponse, TransportError>;

pub struct ScriptedTransport {
    replies: Mutex<Vec<Reply>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<Reply>) -> Self {
        // Stored reversed so pop() hands replies out in order.
        let mut replies = replies;
        replies.reverse();
        Self {
            replies: Mutex::new(replies),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(status: u16, headers: Headers, body: &str) -> Self {
        Self::new(vec![Ok(HttpResponse {
            status,
            headers,
            body: Bytes::from(body.to_string()),
        })])
    }

    pub fn replying_json(status: u16, body: &str) -> Self {
        Self::replying(
            status,
            vec![("content-type".to_string(), "application/json".to_string())],
            body,
        )
    }

    pub fn last_request(&self) -> Option<HttpRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl HttpTransport for ScriptedTransport {
    fn send<'a>(
        &'a self,
        req: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            self.requests.lock().unwrap().push(req);
            match self.replies.lock().unwrap().pop() {
                Some(reply) => reply,
                None => Ok(HttpResponse {
                    status: 599,
                    headers: Vec::new(),
                    body: Bytes::from_static(b"scripted transport exhausted"),
                }),
            }
        })
    }
}

pub fn ctx_for(provider: &str, model: &str, key_index: usize) -> CallContext {
    CallContext {
        request_id: "req-test".to_string(),
        trace_id: None,
        virtual_model: "vm-test".to_string(),
        provider: provider.to_string(),
        model: model.to_string(),
        key_index,
        attempt_no: 1,
    }
}

pub fn sample_request(model: &str) -> ChatCompletionRequest {
    ChatCompletionRequest {
        model: model.to_string(),
        messages: vec![
            ChatMessage::text(Role::System, "be brief"),
            ChatMessage::text(Role::User, "hi"),
        ],
        temperature: Some(0.2),
        top_p: None,
        max_tokens: Some(64),
        stop: None,
        stream: None,
        tools: None,
        tool_choice: None,
        user: None,
    }
}
