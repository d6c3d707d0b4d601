//! Agent Orchestrator: drives one chat turn against a language model,
//! executing its tool calls on the session's canvas.

pub mod model;
pub mod openai;
pub mod scripted;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::dispatch::{DispatchError, Dispatcher};
use crate::tools::{catalog, parse_tool_call};

pub use model::{ChatMessage, LanguageModel, LlmError, ModelRequest, ModelTurn, Role, ToolCall};
pub use openai::OpenAiChatModel;
pub use scripted::ScriptedModel;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a technical diagram assistant that helps users create and modify diagrams.
When the user asks you to draw something, you should:
1. Analyze their request
2. Use the available tools to draw shapes, add text, and connect elements
3. Confirm what you drew

Always respond conversationally and confirm your actions.";

/// Reply used when the model finishes without any text.
pub const FALLBACK_REPLY: &str = "I processed your request.";

pub const DEFAULT_MAX_STEPS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRole {
    User,
    Assistant,
}

/// One prior chat message supplied by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: HistoryRole,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub model: String,
    pub system_prompt: String,
    pub max_steps: usize,
    /// Per tool call deadline; `None` uses the dispatcher default.
    pub tool_timeout: Option<Duration>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_steps: DEFAULT_MAX_STEPS,
            tool_timeout: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Client not connected.")]
    NotConnected,
    #[error("failed to reach the canvas: {0}")]
    Transport(DispatchError),
    #[error("model request failed: {0}")]
    Model(#[from] LlmError),
    #[error("no final reply after {0} model steps")]
    StepLimit(usize),
}

pub struct Orchestrator {
    dispatcher: Dispatcher,
    model: Arc<dyn LanguageModel>,
    config: AgentConfig,
}

impl Orchestrator {
    pub fn new(dispatcher: Dispatcher, model: Arc<dyn LanguageModel>, config: AgentConfig) -> Self {
        Self {
            dispatcher,
            model,
            config,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Run one user turn for `session_id` and return the assistant's reply.
    ///
    /// Tool calls are executed strictly in order; a failed tool result is
    /// handed back to the model rather than ending the turn.
    pub async fn process_message(
        &self,
        session_id: &str,
        text: &str,
        history: &[HistoryEntry],
    ) -> Result<String, AgentError> {
        if self.dispatcher.registry().lookup(session_id).is_none() {
            return Err(AgentError::NotConnected);
        }

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(self.config.system_prompt.clone()));
        messages.extend(history.iter().map(|entry| match entry.role {
            HistoryRole::User => ChatMessage::user(entry.content.clone()),
            HistoryRole::Assistant => ChatMessage::assistant(entry.content.clone()),
        }));
        messages.push(ChatMessage::user(text));

        let tools = catalog();

        for step in 0..self.config.max_steps {
            let request = ModelRequest {
                model: self.config.model.clone(),
                messages: messages.clone(),
                tools: tools.clone(),
            };
            let turn = self.model.complete(&request).await?;
            tracing::debug!(
                session = %session_id,
                step,
                provider = self.model.provider(),
                tool_calls = turn.tool_calls.len(),
                "model step"
            );

            if turn.tool_calls.is_empty() {
                let reply = turn
                    .text
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or_else(|| FALLBACK_REPLY.to_string());
                return Ok(reply);
            }

            messages.push(ChatMessage::assistant_tool_calls(
                turn.text.clone(),
                turn.tool_calls.clone(),
            ));
            for call in &turn.tool_calls {
                let output = self.run_tool_call(session_id, call).await?;
                messages.push(ChatMessage::tool(call.id.clone(), output.to_string()));
            }
        }

        tracing::warn!(session = %session_id, max_steps = self.config.max_steps, "agent step limit reached");
        Err(AgentError::StepLimit(self.config.max_steps))
    }

    async fn run_tool_call(&self, session_id: &str, call: &ToolCall) -> Result<Value, AgentError> {
        let invocation = match parse_tool_call(&call.name, call.arguments.clone()) {
            Ok(invocation) => invocation,
            Err(e) => {
                tracing::debug!(session = %session_id, tool = %call.name, error = %e, "rejected tool call");
                return Ok(json!({ "success": false, "error": e.to_string() }));
            }
        };

        let result = match self
            .dispatcher
            .try_invoke(
                session_id,
                invocation.action(),
                invocation.payload.clone(),
                self.config.tool_timeout,
            )
            .await
        {
            Ok(result) => result,
            Err(DispatchError::SendFailed) => {
                return Err(AgentError::Transport(DispatchError::SendFailed))
            }
            Err(e) => e.into_result(),
        };
        Ok(invocation.render(&result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{execute, Scene};
    use crate::protocol::ServerFrame;
    use crate::session::{Connection, SessionRegistry};
    use tokio::sync::mpsc;

    fn call(id: &str, name: &str, arguments: Value) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Registers `session` backed by an in-memory scene that answers tool calls.
    fn connect_canvas(dispatcher: &Dispatcher, session: &str) -> Arc<parking_lot::Mutex<Scene>> {
        let (tx, mut rx) = mpsc::channel(8);
        let connection = Connection::new(tx);
        dispatcher.registry().register(session, connection.clone());

        let scene = Arc::new(parking_lot::Mutex::new(Scene::new()));
        let dispatcher = dispatcher.clone();
        let shared = scene.clone();
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let ServerFrame::Invoke {
                    id,
                    action,
                    payload,
                } = frame
                {
                    let result = execute(&mut *shared.lock(), action.as_str(), &payload);
                    dispatcher.resolve(connection.id(), &id, result);
                }
            }
        });
        scene
    }

    fn orchestrator(model: Arc<ScriptedModel>) -> (Orchestrator, Dispatcher) {
        let dispatcher = Dispatcher::new(SessionRegistry::new());
        let config = AgentConfig {
            max_steps: 4,
            ..AgentConfig::default()
        };
        (
            Orchestrator::new(dispatcher.clone(), model, config),
            dispatcher,
        )
    }

    #[tokio::test]
    async fn unconnected_session_is_rejected_before_model_runs() {
        let model = Arc::new(ScriptedModel::default());
        let (agent, _) = orchestrator(model.clone());

        let err = agent.process_message("nobody", "hi", &[]).await.unwrap_err();
        assert!(matches!(err, AgentError::NotConnected));
        assert_eq!(err.to_string(), "Client not connected.");
        assert!(model.requests().is_empty());
    }

    #[tokio::test]
    async fn text_reply_is_returned_with_history_in_context() {
        let model = Arc::new(ScriptedModel::new([ModelTurn::text("Hello!")]));
        let (agent, dispatcher) = orchestrator(model.clone());
        connect_canvas(&dispatcher, "s1");

        let history = vec![
            HistoryEntry {
                role: HistoryRole::User,
                content: "earlier".into(),
            },
            HistoryEntry {
                role: HistoryRole::Assistant,
                content: "reply".into(),
            },
        ];
        let reply = agent.process_message("s1", "now", &history).await.unwrap();
        assert_eq!(reply, "Hello!");

        let request = &model.requests()[0];
        let roles: Vec<Role> = request.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::User]);
        assert_eq!(request.messages[3].content, "now");
        assert_eq!(request.tools.len(), 10);
    }

    #[tokio::test]
    async fn tool_calls_mutate_canvas_in_order() {
        let model = Arc::new(ScriptedModel::new([
            ModelTurn::tool_calls(vec![
                call("c1", "add_rectangle", json!({"x": 0, "y": 0, "width": 100, "height": 50})),
                call("c2", "add_text", json!({"x": 10, "y": 10, "text": "Box"})),
            ]),
            ModelTurn::text("Drew a labelled box."),
        ]));
        let (agent, dispatcher) = orchestrator(model.clone());
        let scene = connect_canvas(&dispatcher, "s1");

        let reply = agent.process_message("s1", "draw a box", &[]).await.unwrap();
        assert_eq!(reply, "Drew a labelled box.");

        let scene = scene.lock();
        assert_eq!(scene.len(), 2);
        assert_eq!(scene.elements()[1].text.as_deref(), Some("Box"));

        let second = &model.requests()[1];
        let tool_msgs: Vec<&ChatMessage> = second
            .messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .collect();
        assert_eq!(tool_msgs.len(), 2);
        assert_eq!(tool_msgs[0].tool_call_id.as_deref(), Some("c1"));
        let result: Value = serde_json::from_str(&tool_msgs[0].content).unwrap();
        assert_eq!(result["success"], true);
    }

    #[tokio::test]
    async fn failed_tool_result_goes_back_to_model() {
        let model = Arc::new(ScriptedModel::new([
            ModelTurn::tool_calls(vec![
                call("c1", "update_element", json!({"elementId": "ghost", "x": 1})),
                call("c2", "draw_unicorn", json!({})),
            ]),
            ModelTurn::text("That element does not exist."),
        ]));
        let (agent, dispatcher) = orchestrator(model.clone());
        connect_canvas(&dispatcher, "s1");

        let reply = agent.process_message("s1", "move it", &[]).await.unwrap();
        assert_eq!(reply, "That element does not exist.");

        let messages = &model.requests()[1].messages;
        let outputs: Vec<Value> = messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .map(|m| serde_json::from_str(&m.content).unwrap())
            .collect();
        assert_eq!(outputs[0]["error"], "not found");
        assert_eq!(outputs[1]["success"], false);
        assert!(outputs[1]["error"].as_str().unwrap().contains("unknown tool"));
    }

    #[tokio::test]
    async fn empty_final_text_uses_fallback() {
        let model = Arc::new(ScriptedModel::new([ModelTurn::default()]));
        let (agent, dispatcher) = orchestrator(model);
        connect_canvas(&dispatcher, "s1");

        assert_eq!(agent.process_message("s1", "hi", &[]).await.unwrap(), FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn endless_tool_calls_hit_step_limit() {
        let turns = (0..4).map(|i| {
            ModelTurn::tool_calls(vec![call(&format!("c{i}"), "clear_canvas", Value::Null)])
        });
        let model = Arc::new(ScriptedModel::new(turns));
        let (agent, dispatcher) = orchestrator(model);
        connect_canvas(&dispatcher, "s1");

        assert!(matches!(
            agent.process_message("s1", "loop", &[]).await,
            Err(AgentError::StepLimit(4))
        ));
    }

    #[tokio::test]
    async fn send_failure_aborts_the_turn() {
        let model = Arc::new(ScriptedModel::new([ModelTurn::tool_calls(vec![call(
            "c1",
            "clear_canvas",
            Value::Null,
        )])]));
        let (agent, dispatcher) = orchestrator(model);
        let (tx, rx) = mpsc::channel(1);
        dispatcher.registry().register("s1", Connection::new(tx));
        drop(rx);

        assert!(matches!(
            agent.process_message("s1", "clear", &[]).await,
            Err(AgentError::Transport(DispatchError::SendFailed))
        ));
    }

    #[tokio::test]
    async fn model_errors_propagate() {
        let model = Arc::new(ScriptedModel::new(Vec::<ModelTurn>::new()));
        let (agent, dispatcher) = orchestrator(model);
        connect_canvas(&dispatcher, "s1");

        assert!(matches!(
            agent.process_message("s1", "hi", &[]).await,
            Err(AgentError::Model(LlmError::Unknown { .. }))
        ));
    }
}
