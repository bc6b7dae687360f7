//! Binding router: resolves `(channel, account, peer, guild, team)` to
//! an agent and a stable session key.
//!
//! Match order (first hit wins; declaration order decides within a
//! class): peer, parent peer (thread inheritance), guild, team,
//! explicit account, channel wildcard, default agent.

use serde::Serialize;

use ag_domain::config::{BindingMatch, BindingRule, RoutePeer, SessionsConfig};
use ag_domain::trace::TraceEvent;

use crate::session_key::{
    build_main_session_key, build_session_key, normalize_id, normalize_token,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which binding class produced the route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatchedBy {
    #[serde(rename = "binding.peer")]
    BindingPeer,
    #[serde(rename = "binding.peer.parent")]
    BindingPeerParent,
    #[serde(rename = "binding.guild")]
    BindingGuild,
    #[serde(rename = "binding.team")]
    BindingTeam,
    #[serde(rename = "binding.account")]
    BindingAccount,
    #[serde(rename = "binding.channel")]
    BindingChannel,
    #[serde(rename = "default")]
    Default,
}

impl MatchedBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchedBy::BindingPeer => "binding.peer",
            MatchedBy::BindingPeerParent => "binding.peer.parent",
            MatchedBy::BindingGuild => "binding.guild",
            MatchedBy::BindingTeam => "binding.team",
            MatchedBy::BindingAccount => "binding.account",
            MatchedBy::BindingChannel => "binding.channel",
            MatchedBy::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteResult {
    pub agent_id: String,
    pub channel: String,
    pub account_id: String,
    pub session_key: String,
    pub main_session_key: String,
    pub matched_by: MatchedBy,
}

/// Route inputs for one inbound turn.
#[derive(Debug, Clone, Default)]
pub struct RouteRequest {
    pub channel: String,
    pub account_id: Option<String>,
    pub peer: Option<RoutePeer>,
    /// Root peer for threaded messages inheriting their binding.
    pub parent_peer: Option<RoutePeer>,
    pub guild_id: Option<String>,
    pub team_id: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Matching
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn matches_account_id(match_value: Option<&str>, actual: &str) -> bool {
    let trimmed = match_value.unwrap_or("").trim();
    if trimmed.is_empty() {
        // No account in the rule matches only the default account.
        return actual.is_empty();
    }
    if trimmed == "*" {
        return true;
    }
    trimmed == actual
}

fn matches_peer(m: &BindingMatch, peer: &RoutePeer) -> bool {
    match &m.peer {
        Some(rule_peer) => {
            !rule_peer.id.trim().is_empty()
                && rule_peer.kind == peer.kind
                && normalize_id(&rule_peer.id) == peer.id
        }
        None => false,
    }
}

fn matches_guild(m: &BindingMatch, guild_id: &str) -> bool {
    m.guild_id
        .as_deref()
        .map(normalize_id)
        .is_some_and(|g| !g.is_empty() && g == guild_id)
}

fn matches_team(m: &BindingMatch, team_id: &str) -> bool {
    m.team_id
        .as_deref()
        .map(normalize_id)
        .is_some_and(|t| !t.is_empty() && t == team_id)
}

fn is_scope_free(m: &BindingMatch) -> bool {
    m.peer.is_none() && m.guild_id.is_none() && m.team_id.is_none()
}

/// Unknown agent IDs fall back to the configured default. An empty
/// `agents` list accepts any ID as-is.
fn pick_existing_agent_id(config: &SessionsConfig, agent_id: &str) -> String {
    let trimmed = agent_id.trim();
    if trimmed.is_empty() {
        return normalize_token(&config.default_agent);
    }
    let normalized = normalize_token(trimmed);
    if config.agents.is_empty() {
        return normalized;
    }
    config
        .agents
        .iter()
        .find(|a| normalize_token(a) == normalized)
        .map(|a| normalize_token(a))
        .unwrap_or_else(|| normalize_token(&config.default_agent))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Resolution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Resolve the agent and session key for a route. Deterministic and
/// referentially transparent in `config` and the request.
pub fn resolve_route(config: &SessionsConfig, req: &RouteRequest) -> RouteResult {
    let channel = normalize_token(&req.channel);
    let account_id = req
        .account_id
        .as_deref()
        .map(normalize_id)
        .unwrap_or_default();

    let peer = req.peer.as_ref().map(|p| RoutePeer {
        kind: p.kind,
        id: normalize_id(&p.id),
    });
    let parent_peer = req.parent_peer.as_ref().map(|p| RoutePeer {
        kind: p.kind,
        id: normalize_id(&p.id),
    });
    let guild_id = req.guild_id.as_deref().map(normalize_id).unwrap_or_default();
    let team_id = req.team_id.as_deref().map(normalize_id).unwrap_or_default();

    // Rules outside this channel/account never participate.
    let bindings: Vec<&BindingRule> = config
        .bindings
        .iter()
        .filter(|b| normalize_token(&b.match_.channel) == channel)
        .filter(|b| matches_account_id(b.match_.account_id.as_deref(), &account_id))
        .collect();

    let choose = |agent_id: &str, matched_by: MatchedBy| -> RouteResult {
        let resolved = pick_existing_agent_id(config, agent_id);
        let session_key = build_session_key(
            &resolved,
            &channel,
            &account_id,
            peer.as_ref(),
            config.dm_scope,
            &config.identity_links,
        );
        let result = RouteResult {
            main_session_key: build_main_session_key(&resolved),
            agent_id: resolved,
            channel: channel.clone(),
            account_id: account_id.clone(),
            session_key,
            matched_by,
        };
        TraceEvent::RouteResolved {
            channel: result.channel.clone(),
            agent_id: result.agent_id.clone(),
            matched_by: matched_by.as_str().into(),
        }
        .emit();
        result
    };

    // 1. Peer binding.
    if let Some(ref p) = peer {
        if let Some(b) = bindings.iter().find(|b| matches_peer(&b.match_, p)) {
            return choose(&b.agent_id, MatchedBy::BindingPeer);
        }
    }

    // 2. Parent peer binding (threads inherit their root's binding).
    if let Some(ref pp) = parent_peer {
        if !pp.id.is_empty() {
            if let Some(b) = bindings.iter().find(|b| matches_peer(&b.match_, pp)) {
                return choose(&b.agent_id, MatchedBy::BindingPeerParent);
            }
        }
    }

    // 3. Guild binding.
    if !guild_id.is_empty() {
        if let Some(b) = bindings.iter().find(|b| matches_guild(&b.match_, &guild_id)) {
            return choose(&b.agent_id, MatchedBy::BindingGuild);
        }
    }

    // 4. Team binding.
    if !team_id.is_empty() {
        if let Some(b) = bindings.iter().find(|b| matches_team(&b.match_, &team_id)) {
            return choose(&b.agent_id, MatchedBy::BindingTeam);
        }
    }

    // 5. Account binding: explicit (non-wildcard) account, no scopes.
    if let Some(b) = bindings.iter().find(|b| {
        is_scope_free(&b.match_)
            && !matches!(b.match_.account_id.as_deref().map(str::trim), None | Some("") | Some("*"))
    }) {
        return choose(&b.agent_id, MatchedBy::BindingAccount);
    }

    // 6. Channel binding: wildcard account, no scopes.
    if let Some(b) = bindings.iter().find(|b| {
        is_scope_free(&b.match_) && b.match_.account_id.as_deref().map(str::trim) == Some("*")
    }) {
        return choose(&b.agent_id, MatchedBy::BindingChannel);
    }

    // 7. Default agent.
    choose(&config.default_agent, MatchedBy::Default)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use ag_domain::config::{DmScope, PeerKind};

    fn dm(id: &str) -> RoutePeer {
        RoutePeer {
            kind: PeerKind::Dm,
            id: id.into(),
        }
    }

    fn binding(agent: &str, m: BindingMatch) -> BindingRule {
        BindingRule {
            agent_id: agent.into(),
            match_: m,
        }
    }

    fn config(bindings: Vec<BindingRule>) -> SessionsConfig {
        SessionsConfig {
            default_agent: "main".into(),
            dm_scope: DmScope::Main,
            bindings,
            ..SessionsConfig::default()
        }
    }

    #[test]
    fn peer_binding_wins() {
        let cfg = config(vec![binding(
            "coder",
            BindingMatch {
                channel: "telegram".into(),
                peer: Some(dm("123")),
                ..BindingMatch::default()
            },
        )]);

        let route = resolve_route(
            &cfg,
            &RouteRequest {
                channel: "TELEGRAM".into(),
                peer: Some(dm("123")),
                ..RouteRequest::default()
            },
        );

        assert_eq!(route.matched_by, MatchedBy::BindingPeer);
        assert_eq!(route.agent_id, "coder");
        assert_eq!(route.session_key, "coder|telegram||dm|123|main");
    }

    #[test]
    fn default_route_fallback() {
        let cfg = config(vec![]);
        let route = resolve_route(
            &cfg,
            &RouteRequest {
                channel: "slack".into(),
                account_id: Some("acct7".into()),
                ..RouteRequest::default()
            },
        );

        assert_eq!(route.matched_by, MatchedBy::Default);
        assert_eq!(route.agent_id, "main");
        assert_eq!(route.session_key, "main|slack|acct7|||main");
        assert_eq!(route.main_session_key, "main|||||main");
    }

    #[test]
    fn parent_peer_inherits_thread_binding() {
        let cfg = config(vec![binding(
            "support",
            BindingMatch {
                channel: "discord".into(),
                account_id: Some("*".into()),
                peer: Some(RoutePeer {
                    kind: PeerKind::Channel,
                    id: "help-desk".into(),
                }),
                ..BindingMatch::default()
            },
        )]);

        let route = resolve_route(
            &cfg,
            &RouteRequest {
                channel: "discord".into(),
                peer: Some(RoutePeer {
                    kind: PeerKind::Channel,
                    id: "thread-42".into(),
                }),
                parent_peer: Some(RoutePeer {
                    kind: PeerKind::Channel,
                    id: "help-desk".into(),
                }),
                ..RouteRequest::default()
            },
        );

        assert_eq!(route.matched_by, MatchedBy::BindingPeerParent);
        assert_eq!(route.agent_id, "support");
    }

    #[test]
    fn guild_beats_team_and_account() {
        let cfg = config(vec![
            binding(
                "teambot",
                BindingMatch {
                    channel: "discord".into(),
                    account_id: Some("*".into()),
                    team_id: Some("T1".into()),
                    ..BindingMatch::default()
                },
            ),
            binding(
                "guildbot",
                BindingMatch {
                    channel: "discord".into(),
                    account_id: Some("*".into()),
                    guild_id: Some("G1".into()),
                    ..BindingMatch::default()
                },
            ),
        ]);

        let route = resolve_route(
            &cfg,
            &RouteRequest {
                channel: "discord".into(),
                guild_id: Some("G1".into()),
                team_id: Some("T1".into()),
                ..RouteRequest::default()
            },
        );
        assert_eq!(route.matched_by, MatchedBy::BindingGuild);
        assert_eq!(route.agent_id, "guildbot");
    }

    #[test]
    fn account_binding_requires_explicit_account() {
        let cfg = config(vec![
            binding(
                "wildcard",
                BindingMatch {
                    channel: "slack".into(),
                    account_id: Some("*".into()),
                    ..BindingMatch::default()
                },
            ),
            binding(
                "scoped",
                BindingMatch {
                    channel: "slack".into(),
                    account_id: Some("acct7".into()),
                    ..BindingMatch::default()
                },
            ),
        ]);

        let route = resolve_route(
            &cfg,
            &RouteRequest {
                channel: "slack".into(),
                account_id: Some("acct7".into()),
                ..RouteRequest::default()
            },
        );
        assert_eq!(route.matched_by, MatchedBy::BindingAccount);
        assert_eq!(route.agent_id, "scoped");

        // Without a matching explicit account the wildcard rule applies.
        let route = resolve_route(
            &cfg,
            &RouteRequest {
                channel: "slack".into(),
                account_id: Some("other".into()),
                ..RouteRequest::default()
            },
        );
        assert_eq!(route.matched_by, MatchedBy::BindingChannel);
        assert_eq!(route.agent_id, "wildcard");
    }

    #[test]
    fn declaration_order_breaks_ties_within_class() {
        let cfg = config(vec![
            binding(
                "first",
                BindingMatch {
                    channel: "telegram".into(),
                    peer: Some(dm("1")),
                    ..BindingMatch::default()
                },
            ),
            binding(
                "second",
                BindingMatch {
                    channel: "telegram".into(),
                    peer: Some(dm("1")),
                    ..BindingMatch::default()
                },
            ),
        ]);

        let route = resolve_route(
            &cfg,
            &RouteRequest {
                channel: "telegram".into(),
                peer: Some(dm("1")),
                ..RouteRequest::default()
            },
        );
        assert_eq!(route.agent_id, "first");
    }

    #[test]
    fn unknown_agent_falls_back_to_default() {
        let mut cfg = config(vec![binding(
            "ghost",
            BindingMatch {
                channel: "telegram".into(),
                peer: Some(dm("1")),
                ..BindingMatch::default()
            },
        )]);
        cfg.agents = vec!["main".into(), "coder".into()];

        let route = resolve_route(
            &cfg,
            &RouteRequest {
                channel: "telegram".into(),
                peer: Some(dm("1")),
                ..RouteRequest::default()
            },
        );
        assert_eq!(route.agent_id, "main");
    }

    #[test]
    fn resolution_is_deterministic() {
        let cfg = config(vec![binding(
            "coder",
            BindingMatch {
                channel: "telegram".into(),
                peer: Some(dm("123")),
                ..BindingMatch::default()
            },
        )]);
        let req = RouteRequest {
            channel: "telegram".into(),
            peer: Some(dm("123")),
            ..RouteRequest::default()
        };
        let a = resolve_route(&cfg, &req);
        let b = resolve_route(&cfg, &req);
        assert_eq!(a.session_key, b.session_key);
        assert_eq!(a.matched_by, b.matched_by);
    }

    #[test]
    fn matched_by_serializes_dotted_names() {
        assert_eq!(
            serde_json::to_value(MatchedBy::BindingPeerParent).unwrap(),
            "binding.peer.parent"
        );
        assert_eq!(serde_json::to_value(MatchedBy::Default).unwrap(), "default");
    }
}
