use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use pivot_types::Result;
use tracing::info;

use crate::{network_error, ApiRequest, ApiResponse, HttpTransport};

/// One canned outcome for [`ScriptedTransport`].
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Respond(ApiResponse),
    /// No response at all, e.g. connection refused.
    Drop(String),
}

impl ScriptedReply {
    pub fn ok(body: impl Into<String>) -> Self {
        ScriptedReply::Respond(ApiResponse::new(200, body))
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        ScriptedReply::Respond(ApiResponse::new(status, body))
    }
}

#[derive(Default)]
struct Script {
    replies: VecDeque<ScriptedReply>,
    requests: Vec<ApiRequest>,
}

/// In-memory backend that plays back queued replies in order and records
/// every request it sees. Used for integration tests and offline demos.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, reply: ScriptedReply) -> &Self {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replies
            .push_back(reply);
        self
    }

    pub fn push_repeated(&self, reply: ScriptedReply, times: usize) -> &Self {
        for _ in 0..times {
            self.push(reply.clone());
        }
        self
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .requests
            .clone()
    }

    pub fn remaining(&self) -> usize {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replies
            .len()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let reply = {
            let mut script = self.script.lock().unwrap_or_else(PoisonError::into_inner);
            script.requests.push(request.clone());
            script.replies.pop_front()
        };
        match reply {
            Some(ScriptedReply::Respond(response)) => Ok(response),
            Some(ScriptedReply::Drop(reason)) => Err(network_error(reason)),
            None => {
                info!("Scripted transport exhausted at {}", request.path());
                Err(network_error("no scripted reply left"))
            }
        }
    }
}
