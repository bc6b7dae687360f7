//! Context pruning — a pre-turn transform that bounds token usage.
//!
//! Modes:
//! - `disabled`: identity.
//! - `cache-ttl`: drop prunable tool results older than the TTL.
//! - `soft-trim`: drop prunable tool results once the running token
//!   total would exceed `context_window_tokens × soft_trim_ratio`.
//!
//! System, user, and assistant messages are never pruned; with
//! `keep_bootstrap_safe`, neither is anything before the first user
//! message. Only results of configured prunable tools are eligible.
//! The set of user messages is identical before and after pruning.

use ag_domain::config::{PruningConfig, PruningMode};
use ag_domain::message::Message;
use ag_domain::trace::TraceEvent;

/// Rough character-to-token ratio. The contract only needs monotonicity
/// (longer content → more tokens), not an exact tokenizer.
const CHARS_PER_TOKEN: usize = 4;

pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

fn estimate_message_tokens(msg: &Message) -> usize {
    let serialized = serde_json::to_string(msg).unwrap_or_default();
    estimate_tokens(&serialized)
}

/// Prune a message list, returning a new (possibly shorter) copy.
pub fn prune_context_messages(
    messages: &[Message],
    config: &PruningConfig,
    now_ms: i64,
) -> Vec<Message> {
    if config.mode == PruningMode::Disabled || messages.is_empty() {
        return messages.to_vec();
    }

    let is_prunable = |tool_name: &str| config.prunable_tools.iter().any(|t| t == tool_name);

    // Bootstrap safety boundary: everything before the first user
    // message is protected.
    let first_user_idx = if config.keep_bootstrap_safe {
        messages.iter().position(Message::is_user)
    } else {
        None
    };

    let token_budget = match config.mode {
        PruningMode::SoftTrim => {
            Some((config.context_window_tokens as f64 * config.soft_trim_ratio) as usize)
        }
        _ => None,
    };

    let mut pruned = Vec::with_capacity(messages.len());
    let mut current_tokens = 0usize;

    for (i, msg) in messages.iter().enumerate() {
        if let Some(boundary) = first_user_idx {
            if i < boundary {
                current_tokens += estimate_message_tokens(msg);
                pruned.push(msg.clone());
                continue;
            }
        }

        match msg {
            Message::System { .. } | Message::User { .. } | Message::Assistant { .. } => {
                current_tokens += estimate_message_tokens(msg);
                pruned.push(msg.clone());
            }
            Message::ToolResult {
                tool_name,
                tool_call_id,
                timestamp,
                ..
            } => {
                if !is_prunable(tool_name) {
                    current_tokens += estimate_message_tokens(msg);
                    pruned.push(msg.clone());
                    continue;
                }

                match config.mode {
                    PruningMode::CacheTtl => {
                        match timestamp {
                            Some(ts) if now_ms.saturating_sub(*ts) >= config.ttl_ms as i64 => {
                                tracing::debug!(
                                    tool = %tool_name,
                                    call_id = %tool_call_id,
                                    "pruning tool result (ttl expired)"
                                );
                            }
                            // Missing timestamp: keep.
                            _ => {
                                current_tokens += estimate_message_tokens(msg);
                                pruned.push(msg.clone());
                            }
                        }
                    }
                    PruningMode::SoftTrim => {
                        let msg_tokens = estimate_message_tokens(msg);
                        let budget = token_budget.unwrap_or(usize::MAX);
                        if current_tokens + msg_tokens > budget {
                            tracing::debug!(
                                tool = %tool_name,
                                call_id = %tool_call_id,
                                "pruning tool result (soft-trim budget)"
                            );
                        } else {
                            current_tokens += msg_tokens;
                            pruned.push(msg.clone());
                        }
                    }
                    PruningMode::Disabled => unreachable!("handled above"),
                }
            }
        }
    }

    if pruned.len() != messages.len() {
        TraceEvent::ContextPruned {
            mode: config.mode.as_str().into(),
            before: messages.len(),
            after: pruned.len(),
        }
        .emit();
    }

    pruned
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_result_at(tool: &str, content: &str, ts: i64) -> Message {
        Message::ToolResult {
            tool_call_id: "c".into(),
            tool_name: tool.into(),
            content: content.into(),
            success: true,
            timestamp: Some(ts),
        }
    }

    fn user_messages(messages: &[Message]) -> Vec<&Message> {
        messages.iter().filter(|m| m.is_user()).collect()
    }

    fn config(mode: PruningMode) -> PruningConfig {
        PruningConfig {
            mode,
            ..PruningConfig::default()
        }
    }

    #[test]
    fn disabled_mode_is_identity() {
        let messages = vec![
            Message::user("q"),
            tool_result_at("bash", "x".repeat(100_000).as_str(), 0),
        ];
        let pruned = prune_context_messages(&messages, &config(PruningMode::Disabled), 1_000_000);
        assert_eq!(pruned, messages);
    }

    #[test]
    fn cache_ttl_drops_expired_tool_results() {
        let now: i64 = 1_000_000;
        let cfg = PruningConfig {
            mode: PruningMode::CacheTtl,
            ttl_ms: 300_000,
            ..PruningConfig::default()
        };
        let messages = vec![
            Message::user("q1"),
            tool_result_at("bash", "old output", now - 400_000),
            Message::user("q2"),
        ];

        let pruned = prune_context_messages(&messages, &cfg, now);
        assert_eq!(pruned.len(), 2);
        assert!(pruned.iter().all(Message::is_user));
    }

    #[test]
    fn cache_ttl_boundary_is_inclusive_at_expiry() {
        let now: i64 = 1_000_000;
        let cfg = PruningConfig {
            mode: PruningMode::CacheTtl,
            ttl_ms: 300_000,
            ..PruningConfig::default()
        };

        // Exactly at TTL: pruned (age >= ttl).
        let at = vec![tool_result_at("bash", "x", now - 300_000), Message::user("q")];
        assert_eq!(prune_context_messages(&at, &cfg, now).len(), 1);

        // One ms younger: kept.
        let young = vec![tool_result_at("bash", "x", now - 299_999), Message::user("q")];
        assert_eq!(prune_context_messages(&young, &cfg, now).len(), 2);
    }

    #[test]
    fn cache_ttl_keeps_results_without_timestamp() {
        let cfg = PruningConfig {
            mode: PruningMode::CacheTtl,
            ttl_ms: 1,
            ..PruningConfig::default()
        };
        let messages = vec![
            Message::user("q"),
            Message::ToolResult {
                tool_call_id: "c".into(),
                tool_name: "bash".into(),
                content: "no ts".into(),
                success: true,
                timestamp: None,
            },
        ];
        assert_eq!(prune_context_messages(&messages, &cfg, 1_000_000).len(), 2);
    }

    #[test]
    fn non_prunable_tools_are_kept() {
        let now: i64 = 1_000_000;
        let cfg = PruningConfig {
            mode: PruningMode::CacheTtl,
            ttl_ms: 1,
            prunable_tools: vec!["bash".into()],
            ..PruningConfig::default()
        };
        let messages = vec![
            Message::user("q"),
            tool_result_at("browser", "precious", 0),
        ];
        assert_eq!(prune_context_messages(&messages, &cfg, now).len(), 2);
    }

    #[test]
    fn soft_trim_preserves_all_users() {
        let cfg = PruningConfig {
            mode: PruningMode::SoftTrim,
            soft_trim_ratio: 0.25,
            context_window_tokens: 10_000,
            ..PruningConfig::default()
        };

        let mut messages = Vec::new();
        for i in 0..10 {
            messages.push(Message::user(format!("question {i}")));
            messages.push(tool_result_at("bash", &"y".repeat(10_000), 0));
        }

        let pruned = prune_context_messages(&messages, &cfg, 0);
        assert_eq!(user_messages(&pruned).len(), 10);
        let kept_tools = pruned
            .iter()
            .filter(|m| matches!(m, Message::ToolResult { .. }))
            .count();
        assert!(kept_tools < 10, "at least one tool result must be dropped");
    }

    #[test]
    fn soft_trim_ratio_zero_keeps_only_non_prunable() {
        let cfg = PruningConfig {
            mode: PruningMode::SoftTrim,
            soft_trim_ratio: 0.0,
            context_window_tokens: 10_000,
            ..PruningConfig::default()
        };
        let messages = vec![
            Message::user("q"),
            tool_result_at("bash", "drop me", 0),
            Message::assistant("a"),
            tool_result_at("browser", "keep me", 0),
        ];

        let pruned = prune_context_messages(&messages, &cfg, 0);
        assert_eq!(pruned.len(), 3);
        assert!(pruned
            .iter()
            .all(|m| !matches!(m, Message::ToolResult { tool_name, .. } if tool_name == "bash")));
    }

    #[test]
    fn bootstrap_messages_are_protected() {
        let cfg = PruningConfig {
            mode: PruningMode::SoftTrim,
            soft_trim_ratio: 0.0,
            context_window_tokens: 100,
            keep_bootstrap_safe: true,
            ..PruningConfig::default()
        };
        // A tool result *before* the first user message survives ratio 0.
        let messages = vec![
            Message::system("boot"),
            tool_result_at("bash", "bootstrap state", 0),
            Message::user("q"),
            tool_result_at("bash", "late output", 0),
        ];

        let pruned = prune_context_messages(&messages, &cfg, 0);
        assert_eq!(pruned.len(), 3);
        assert!(matches!(&pruned[1], Message::ToolResult { content, .. } if content == "bootstrap state"));
    }

    #[test]
    fn user_set_invariant_holds_across_modes() {
        let now: i64 = 10_000_000;
        let mut messages = vec![Message::system("sys")];
        for i in 0..5 {
            messages.push(Message::user(format!("u{i}")));
            messages.push(tool_result_at("bash", &"z".repeat(5_000), now - (i * 100_000)));
        }

        for mode in [PruningMode::Disabled, PruningMode::CacheTtl, PruningMode::SoftTrim] {
            let cfg = PruningConfig {
                mode,
                ttl_ms: 150_000,
                soft_trim_ratio: 0.1,
                context_window_tokens: 5_000,
                ..PruningConfig::default()
            };
            let pruned = prune_context_messages(&messages, &cfg, now);
            assert_eq!(
                user_messages(&pruned).len(),
                user_messages(&messages).len(),
                "mode {mode:?} must not drop user messages"
            );
        }
    }

    #[test]
    fn token_estimate_is_monotone() {
        assert!(estimate_tokens("abcd") <= estimate_tokens("abcdabcd"));
        assert!(estimate_tokens("") <= estimate_tokens("a"));
    }
}
