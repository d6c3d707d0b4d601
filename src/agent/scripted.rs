use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::model::{LanguageModel, LlmError, ModelRequest, ModelTurn};

/// Deterministic model that replays a fixed sequence of turns.
///
/// Every request it receives is recorded so tests can inspect the
/// conversation the orchestrator built.
pub struct ScriptedModel {
    turns: Mutex<VecDeque<ModelTurn>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new(turns: impl IntoIterator<Item = ModelTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.turns.lock().len()
    }
}

impl Default for ScriptedModel {
    fn default() -> Self {
        Self::new([ModelTurn::text("ok")])
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelTurn, LlmError> {
        self.requests.lock().push(request.clone());
        self.turns.lock().pop_front().ok_or_else(|| LlmError::Unknown {
            message: "script exhausted".into(),
        })
    }

    fn provider(&self) -> &'static str {
        "scripted"
    }
}
