//! Tools callable by the assistant

mod tasks;

pub use tasks::{TASK_TOOL_NAMES, TaskTools};

use serde_json::Value;

use crate::live::protocol::FunctionDecl;

/// Dispatches tool calls and absorbs handler failures.
///
/// Execution never errors outward: a failing handler becomes an error
/// string sent back as that call's result, so one bad call cannot stall
/// the dialogue.
#[derive(Clone)]
pub struct ToolRegistry {
    tasks: TaskTools,
}

impl ToolRegistry {
    #[must_use]
    pub const fn new(tasks: TaskTools) -> Self {
        Self { tasks }
    }

    /// Declarations for every registered tool
    #[must_use]
    pub fn declarations(&self) -> Vec<FunctionDecl> {
        TaskTools::declarations()
    }

    /// Execute a tool call, stringifying any failure into the result
    pub fn execute(&self, name: &str, arguments: &Value) -> String {
        tracing::info!(tool = %name, "executing tool call");

        let result = if TASK_TOOL_NAMES.contains(&name) {
            self.tasks.execute(name, arguments)
        } else {
            Err(crate::Error::Tool(format!("unknown tool: {name}")))
        };

        match result {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(tool = %name, error = %e, "tool call failed");
                format!("Error: {e}")
            }
        }
    }
}
