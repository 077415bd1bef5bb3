//! Streaming agent loop with tool dispatch.
//!
//! The loop streams model output, surfaces progress as events (tokens,
//! thoughts, tool invocations), executes requested tools, feeds results back
//! into the conversation, and iterates until the model answers without
//! calling a tool or a stop condition fires.

use crate::executor::{CallOptions, ExecutorError, RequestExecutor};
use crate::provider::{
    Content, FunctionCall, GenerateRequest, GenerativeBackend, ToolDeclaration,
};
use futures_util::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod tools;

pub use tools::{AgentTool, ToolError, ToolRegistry};

/// Hard ceiling on reasoning iterations per run.
pub const DEFAULT_MAX_ITERATIONS: u32 = 5;

/// Progress event emitted while the loop runs.
///
/// Within one iteration, every `Token` is emitted before any `Tool` event,
/// matching the order the model produced them.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// A fragment of model text, in stream order.
    Token(String),
    /// A short status line about what the loop is doing.
    Thought(String),
    /// The model requested a tool invocation.
    Tool { name: String, args: Value },
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The model produced a final answer with no tool calls.
    Completed,
    /// The iteration ceiling was reached before a final answer.
    MaxIterations,
    /// The model repeated the exact same tool call twice in a row.
    LoopDetected,
}

/// Final result of an agent run.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    /// Text of the last model turn.
    pub text: String,
    pub iterations: u32,
    pub stop_reason: StopReason,
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

/// Multi-turn tool-using agent over a streaming backend.
pub struct StreamingAgentLoop {
    backend: Arc<dyn GenerativeBackend>,
    executor: RequestExecutor,
    tools: Arc<ToolRegistry>,
    max_iterations: u32,
}

impl StreamingAgentLoop {
    pub fn new(
        backend: Arc<dyn GenerativeBackend>,
        executor: RequestExecutor,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            backend,
            executor,
            tools,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    /// Run the loop to completion, emitting progress on `events`.
    ///
    /// A closed event channel never aborts the run; events are simply
    /// dropped once the receiver is gone.
    pub async fn run(
        &self,
        mut request: GenerateRequest,
        options: &CallOptions,
        events: mpsc::UnboundedSender<AgentEvent>,
    ) -> Result<AgentOutcome, AgentError> {
        let declarations = self.tools.declarations();
        if !declarations.is_empty() {
            request.tools = vec![ToolDeclaration {
                function_declarations: declarations,
            }];
        }

        let mut last_call: Option<(String, Value)> = None;
        let mut final_text = String::new();

        for iteration in 1..=self.max_iterations {
            tracing::debug!(iteration, model = %request.model, "agent iteration");

            let mut stream = self
                .executor
                .open_stream(options, || {
                    let request = request.clone();
                    let backend = Arc::clone(&self.backend);
                    async move { backend.generate_stream(&request).await }
                })
                .await?;

            // Drain the turn: tokens stream out immediately, tool calls are
            // held until the turn's text is fully emitted.
            let mut turn_text = String::new();
            let mut calls: Vec<FunctionCall> = Vec::new();
            while let Some(chunk) = stream.next().await {
                if !chunk.text.is_empty() {
                    let _ = events.send(AgentEvent::Token(chunk.text.clone()));
                    turn_text.push_str(&chunk.text);
                }
                calls.extend(chunk.function_calls);
            }

            if !turn_text.is_empty() {
                final_text = turn_text.clone();
            }

            if calls.is_empty() {
                return Ok(AgentOutcome {
                    text: final_text,
                    iterations: iteration,
                    stop_reason: StopReason::Completed,
                });
            }

            if !turn_text.is_empty() {
                request.contents.push(Content::model(&turn_text));
            }

            for call in calls {
                let signature = (call.name.clone(), call.args.clone());
                if last_call.as_ref() == Some(&signature) {
                    let _ = events.send(AgentEvent::Thought(format!(
                        "stopping: repeated call to {} with identical arguments",
                        call.name
                    )));
                    tracing::warn!(tool = %call.name, "identical consecutive tool call; stopping");
                    return Ok(AgentOutcome {
                        text: final_text,
                        iterations: iteration,
                        stop_reason: StopReason::LoopDetected,
                    });
                }
                last_call = Some(signature);

                let _ = events.send(AgentEvent::Tool {
                    name: call.name.clone(),
                    args: call.args.clone(),
                });

                let result_text = match self.tools.execute(&call.name, call.args.clone()).await {
                    Ok(value) => {
                        let _ = events.send(AgentEvent::Thought(format!(
                            "tool {} completed",
                            call.name
                        )));
                        value.to_string()
                    }
                    Err(e) => {
                        // Tool failures go back to the model as text so it
                        // can recover or explain.
                        tracing::warn!(tool = %call.name, error = %e, "tool execution failed");
                        let _ = events.send(AgentEvent::Thought(format!(
                            "tool {} failed: {e}",
                            call.name
                        )));
                        serde_json::json!({ "error": e.to_string() }).to_string()
                    }
                };

                request.contents.push(Content::user(format!(
                    "Tool {} returned: {}",
                    call.name, result_text
                )));
            }
        }

        tracing::warn!(
            max_iterations = self.max_iterations,
            "agent stopped at iteration ceiling"
        );
        Ok(AgentOutcome {
            text: final_text,
            iterations: self.max_iterations,
            stop_reason: StopReason::MaxIterations,
        })
    }
}
