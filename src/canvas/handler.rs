//! Remote Execution Handler: applies one tool invocation to a scene.

use std::panic::{catch_unwind, AssertUnwindSafe};

use serde_json::{json, Value};

use super::element::NewElement;
use super::scene::Scene;
use crate::protocol::{ToolAction, ToolCallResult, NOT_FOUND_ERROR, UNKNOWN_ACTION_ERROR};

/// Something that can carry out canvas tool calls.
///
/// Implementations produce exactly one result per call and must not block
/// on anything else.
pub trait ToolExecutor {
    fn execute(&mut self, action: ToolAction, payload: &Value) -> ToolCallResult;
}

impl ToolExecutor for Scene {
    fn execute(&mut self, action: ToolAction, payload: &Value) -> ToolCallResult {
        match action {
            ToolAction::AddElement => add_element(self, payload),
            ToolAction::UpdateElement => update_element(self, payload),
            ToolAction::DeleteElements => delete_elements(self, payload),
            ToolAction::ClearCanvas => {
                self.clear();
                ToolCallResult::ok()
            }
            ToolAction::GetCanvasState => ToolCallResult::ok().with_data(self.snapshot()),
        }
    }
}

/// Execute a named action against `executor`.
///
/// Unknown action names and panics inside the executor both come back as
/// failure results.
pub fn execute<E: ToolExecutor>(executor: &mut E, action: &str, payload: &Value) -> ToolCallResult {
    let Ok(action) = action.parse::<ToolAction>() else {
        tracing::debug!(%action, "unknown canvas action");
        return ToolCallResult::failure(UNKNOWN_ACTION_ERROR);
    };

    match catch_unwind(AssertUnwindSafe(|| executor.execute(action, payload))) {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".into());
            tracing::error!(%action, %message, "canvas handler panicked");
            ToolCallResult::failure(format!("internal error: {message}"))
        }
    }
}

fn invalid(err: impl std::fmt::Display) -> ToolCallResult {
    ToolCallResult::failure(format!("invalid payload: {err}"))
}

fn add_element(scene: &mut Scene, payload: &Value) -> ToolCallResult {
    let new = match NewElement::from_payload(payload) {
        Ok(new) => new,
        Err(err) => return invalid(err),
    };
    match scene.add(new) {
        Ok(element) => ToolCallResult::ok().with_element_id(element.id.clone()),
        Err(err) => invalid(err),
    }
}

fn update_element(scene: &mut Scene, payload: &Value) -> ToolCallResult {
    let Some(fields) = payload.as_object() else {
        return invalid("expected an object");
    };
    let Some(element_id) = fields.get("elementId").and_then(Value::as_str) else {
        return invalid("missing field: elementId");
    };
    let Some(element) = scene.get_mut(element_id) else {
        return ToolCallResult::failure(NOT_FOUND_ERROR);
    };

    let mut patch = fields.clone();
    patch.remove("elementId");
    match element.apply_patch(&patch) {
        Ok(()) => ToolCallResult::ok().with_element_id(element_id),
        Err(err) => invalid(err),
    }
}

fn delete_elements(scene: &mut Scene, payload: &Value) -> ToolCallResult {
    let ids = match payload {
        Value::Array(_) => payload,
        Value::Object(fields) => fields.get("elementIds").unwrap_or(&Value::Null),
        _ => &Value::Null,
    };
    let Some(ids) = ids.as_array() else {
        return invalid("missing field: elementIds");
    };
    let ids: Vec<String> = ids
        .iter()
        .filter_map(|id| id.as_str().map(str::to_string))
        .collect();

    let deleted = scene.remove_many(&ids);
    ToolCallResult::ok().with_data(json!({ "deleted": deleted }))
}
