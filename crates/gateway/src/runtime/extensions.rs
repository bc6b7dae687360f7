//! Extension hooks around tool execution.
//!
//! Two ordered handler lists wrap every tool call: `tool_call` hooks
//! run before execution and may block it; `tool_result` hooks run after
//! and may replace the result (first modification wins). Handler errors
//! are logged and skipped — a broken extension never aborts the
//! pipeline, only an explicit block does.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;

use ag_domain::error::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Events & hook traits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Emitted before tool execution.
#[derive(Debug, Clone)]
pub struct ToolCallEvent {
    pub tool_name: String,
    pub tool_call_id: String,
    pub input: Value,
}

/// A pre-hook's verdict. `block = true` prevents execution.
#[derive(Debug, Clone, Default)]
pub struct ToolCallDecision {
    pub block: bool,
    pub reason: Option<String>,
}

/// Emitted after tool execution (success or failure).
#[derive(Debug, Clone)]
pub struct ToolResultEvent {
    pub tool_name: String,
    pub tool_call_id: String,
    pub input: Value,
    pub content: String,
    pub details: Option<Value>,
    pub is_error: bool,
}

/// A post-hook's replacement for the result.
#[derive(Debug, Clone, Default)]
pub struct ToolResultModification {
    pub content: Option<String>,
    pub details: Option<Value>,
}

#[async_trait]
pub trait ToolCallHook: Send + Sync {
    fn name(&self) -> &str;
    async fn on_tool_call(&self, event: &ToolCallEvent) -> Result<Option<ToolCallDecision>>;
}

#[async_trait]
pub trait ToolResultHook: Send + Sync {
    fn name(&self) -> &str;
    async fn on_tool_result(
        &self,
        event: &ToolResultEvent,
    ) -> Result<Option<ToolResultModification>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runner
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct ExtensionRunner {
    call_hooks: RwLock<Vec<Arc<dyn ToolCallHook>>>,
    result_hooks: RwLock<Vec<Arc<dyn ToolResultHook>>>,
}

impl std::fmt::Debug for ExtensionRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionRunner")
            .field("call_hooks", &self.call_hooks.read().len())
            .field("result_hooks", &self.result_hooks.read().len())
            .finish()
    }
}

impl ExtensionRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_tool_call(&self, hook: Arc<dyn ToolCallHook>) {
        tracing::debug!(hook = hook.name(), "registered tool_call hook");
        self.call_hooks.write().push(hook);
    }

    pub fn on_tool_result(&self, hook: Arc<dyn ToolResultHook>) {
        tracing::debug!(hook = hook.name(), "registered tool_result hook");
        self.result_hooks.write().push(hook);
    }

    pub fn has_call_hooks(&self) -> bool {
        !self.call_hooks.read().is_empty()
    }

    pub fn has_result_hooks(&self) -> bool {
        !self.result_hooks.read().is_empty()
    }

    /// Run `tool_call` hooks in registration order. The first blocking
    /// decision wins; handler errors are logged and skipped.
    pub async fn emit_tool_call(&self, event: &ToolCallEvent) -> Option<ToolCallDecision> {
        let hooks = self.call_hooks.read().clone();
        for hook in hooks {
            match hook.on_tool_call(event).await {
                Ok(Some(decision)) if decision.block => {
                    tracing::info!(
                        tool = %event.tool_name,
                        hook = hook.name(),
                        reason = decision.reason.as_deref().unwrap_or(""),
                        "tool call blocked by extension"
                    );
                    return Some(decision);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(
                        hook = hook.name(),
                        error = %e,
                        "tool_call hook failed — continuing"
                    );
                }
            }
        }
        None
    }

    /// Run `tool_result` hooks in registration order. The first
    /// modification wins; handler errors are logged and skipped.
    pub async fn emit_tool_result(&self, event: &ToolResultEvent) -> Option<ToolResultModification> {
        let hooks = self.result_hooks.read().clone();
        for hook in hooks {
            match hook.on_tool_result(event).await {
                Ok(Some(modification)) => {
                    tracing::debug!(
                        tool = %event.tool_name,
                        hook = hook.name(),
                        "tool result modified by extension"
                    );
                    return Some(modification);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(
                        hook = hook.name(),
                        error = %e,
                        "tool_result hook failed — continuing"
                    );
                }
            }
        }
        None
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use ag_domain::error::Error;

    struct Blocker {
        reason: &'static str,
    }

    #[async_trait]
    impl ToolCallHook for Blocker {
        fn name(&self) -> &str {
            "blocker"
        }
        async fn on_tool_call(&self, _e: &ToolCallEvent) -> Result<Option<ToolCallDecision>> {
            Ok(Some(ToolCallDecision {
                block: true,
                reason: Some(self.reason.into()),
            }))
        }
    }

    struct Failing;

    #[async_trait]
    impl ToolCallHook for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        async fn on_tool_call(&self, _e: &ToolCallEvent) -> Result<Option<ToolCallDecision>> {
            Err(Error::Other("hook exploded".into()))
        }
    }

    struct Rewriter;

    #[async_trait]
    impl ToolResultHook for Rewriter {
        fn name(&self) -> &str {
            "rewriter"
        }
        async fn on_tool_result(
            &self,
            _e: &ToolResultEvent,
        ) -> Result<Option<ToolResultModification>> {
            Ok(Some(ToolResultModification {
                content: Some("rewritten".into()),
                details: None,
            }))
        }
    }

    fn call_event() -> ToolCallEvent {
        ToolCallEvent {
            tool_name: "bash".into(),
            tool_call_id: "c1".into(),
            input: serde_json::json!({}),
        }
    }

    fn result_event() -> ToolResultEvent {
        ToolResultEvent {
            tool_name: "bash".into(),
            tool_call_id: "c1".into(),
            input: serde_json::json!({}),
            content: "original".into(),
            details: None,
            is_error: false,
        }
    }

    #[tokio::test]
    async fn block_decision_short_circuits() {
        let runner = ExtensionRunner::new();
        runner.on_tool_call(Arc::new(Blocker { reason: "policy" }));

        let decision = runner.emit_tool_call(&call_event()).await.unwrap();
        assert!(decision.block);
        assert_eq!(decision.reason.as_deref(), Some("policy"));
    }

    #[tokio::test]
    async fn failing_hook_does_not_abort_pipeline() {
        let runner = ExtensionRunner::new();
        runner.on_tool_call(Arc::new(Failing));
        assert!(runner.emit_tool_call(&call_event()).await.is_none());
    }

    #[tokio::test]
    async fn failing_hook_before_blocker_still_blocks() {
        let runner = ExtensionRunner::new();
        runner.on_tool_call(Arc::new(Failing));
        runner.on_tool_call(Arc::new(Blocker { reason: "second" }));

        let decision = runner.emit_tool_call(&call_event()).await.unwrap();
        assert_eq!(decision.reason.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn first_result_modification_wins() {
        let runner = ExtensionRunner::new();
        runner.on_tool_result(Arc::new(Rewriter));
        runner.on_tool_result(Arc::new(Rewriter));

        let modification = runner.emit_tool_result(&result_event()).await.unwrap();
        assert_eq!(modification.content.as_deref(), Some("rewritten"));
    }

    #[tokio::test]
    async fn no_hooks_means_no_decision() {
        let runner = ExtensionRunner::new();
        assert!(!runner.has_call_hooks());
        assert!(runner.emit_tool_call(&call_event()).await.is_none());
        assert!(runner.emit_tool_result(&result_event()).await.is_none());
    }
}
