//! Session key derivation.
//!
//! A session key is the stable, lowercased identity of one conversation:
//!
//! ```text
//! lower(join("|", [agentId, channel, accountId, peer.kind, peer.id, dmScope]))
//! ```
//!
//! Absent components join as empty strings; the default account is the
//! empty string. Identity links rewrite the peer ID before joining so
//! the same human shares one session across channels. Calling the
//! derivation twice with the same inputs returns byte-identical keys.

use ag_domain::config::{DmScope, IdentityLink, RoutePeer};

/// Scope tokens (channel names, binding keys) are lowercased.
pub fn normalize_token(value: &str) -> String {
    value.trim().to_lowercase()
}

/// IDs preserve case; only surrounding whitespace is stripped.
pub fn normalize_id(value: &str) -> String {
    value.trim().to_string()
}

/// Resolve a peer ID through identity links.
///
/// Aliases have the form `"{channel}:{peerId}"`. A matching link maps
/// the alias to its canonical identity; canonical identities may chain
/// through further links. Cycles are broken by first-seen ordering: an
/// identity already visited stops the walk.
pub fn resolve_linked_peer_id(links: &[IdentityLink], channel: &str, peer_id: &str) -> String {
    let mut id = normalize_id(peer_id);
    if links.is_empty() {
        return id;
    }

    // The first hop may match either the channel-prefixed alias or the
    // bare ID; later hops chain through canonical identities only.
    let mut keys = vec![format!("{}:{}", normalize_token(channel), id), id.clone()];
    let mut seen: Vec<String> = Vec::new();

    loop {
        let next = links.iter().find_map(|link| {
            keys.iter()
                .any(|k| link.aliases.contains(k))
                .then(|| link.canonical.clone())
        });

        match next {
            Some(canonical) if !seen.contains(&canonical) => {
                seen.push(canonical.clone());
                id = canonical.clone();
                keys = vec![canonical];
            }
            _ => break,
        }
    }

    id
}

/// Derive the session key for a resolved route.
pub fn build_session_key(
    agent_id: &str,
    channel: &str,
    account_id: &str,
    peer: Option<&RoutePeer>,
    dm_scope: DmScope,
    identity_links: &[IdentityLink],
) -> String {
    let channel_norm = normalize_token(channel);
    let (peer_kind, peer_id) = match peer {
        Some(p) => (
            p.kind.as_str().to_string(),
            resolve_linked_peer_id(identity_links, &channel_norm, &normalize_id(&p.id)),
        ),
        None => (String::new(), String::new()),
    };

    [
        normalize_id(agent_id),
        channel_norm,
        normalize_id(account_id),
        peer_kind,
        peer_id,
        dm_scope.as_str().to_string(),
    ]
    .join("|")
    .to_lowercase()
}

/// The agent's main session key: same derivation with no route context.
pub fn build_main_session_key(agent_id: &str) -> String {
    [normalize_id(agent_id), String::new(), String::new(), String::new(), String::new(), DmScope::Main.as_str().to_string()]
        .join("|")
        .to_lowercase()
}

/// Map a session key to a filesystem-safe transcript name: every
/// character outside `[A-Za-z0-9._-]` becomes `_`.
pub fn safe_file_key(session_key: &str) -> String {
    session_key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ag_domain::config::PeerKind;

    fn dm(id: &str) -> RoutePeer {
        RoutePeer {
            kind: PeerKind::Dm,
            id: id.into(),
        }
    }

    #[test]
    fn key_is_lowercased_and_joined() {
        let key = build_session_key("Coder", "TELEGRAM", "", Some(&dm("123")), DmScope::Main, &[]);
        assert_eq!(key, "coder|telegram||dm|123|main");
    }

    #[test]
    fn key_is_deterministic() {
        let a = build_session_key("coder", "telegram", "acct", Some(&dm("9")), DmScope::PerPeer, &[]);
        let b = build_session_key("coder", "telegram", "acct", Some(&dm("9")), DmScope::PerPeer, &[]);
        assert_eq!(a, b);
    }

    #[test]
    fn missing_peer_joins_empty_columns() {
        let key = build_session_key("main", "slack", "acct7", None, DmScope::Main, &[]);
        assert_eq!(key, "main|slack|acct7|||main");
    }

    #[test]
    fn main_session_key() {
        assert_eq!(build_main_session_key("Coder"), "coder|||||main");
    }

    #[test]
    fn identity_link_rewrites_peer_id() {
        let links = vec![IdentityLink {
            canonical: "alice".into(),
            aliases: vec!["telegram:123".into(), "discord:987".into()],
        }];
        let tg = build_session_key("main", "telegram", "", Some(&dm("123")), DmScope::PerPeer, &links);
        let dc = build_session_key("main", "discord", "", Some(&dm("987")), DmScope::PerPeer, &links);
        assert_eq!(tg, "main|telegram||dm|alice|per-peer");
        assert_eq!(dc, "main|discord||dm|alice|per-peer");
    }

    #[test]
    fn identity_link_chain_follows_canonicals() {
        let links = vec![
            IdentityLink {
                canonical: "alice".into(),
                aliases: vec!["telegram:123".into()],
            },
            IdentityLink {
                canonical: "alice@corp".into(),
                aliases: vec!["alice".into()],
            },
        ];
        assert_eq!(resolve_linked_peer_id(&links, "telegram", "123"), "alice@corp");
    }

    #[test]
    fn identity_link_cycle_breaks_at_first_seen() {
        let links = vec![
            IdentityLink {
                canonical: "b".into(),
                aliases: vec!["a".into()],
            },
            IdentityLink {
                canonical: "a".into(),
                aliases: vec!["b".into()],
            },
        ];
        // a → b → a: the walk stops when it sees "a" again.
        assert_eq!(resolve_linked_peer_id(&links, "telegram", "a"), "a");
    }

    #[test]
    fn unlinked_peer_passes_through() {
        let links = vec![IdentityLink {
            canonical: "alice".into(),
            aliases: vec!["telegram:123".into()],
        }];
        assert_eq!(resolve_linked_peer_id(&links, "telegram", "999"), "999");
    }

    #[test]
    fn safe_file_key_replaces_separators() {
        assert_eq!(
            safe_file_key("coder|telegram||dm|123|main"),
            "coder_telegram__dm_123_main"
        );
        assert_eq!(safe_file_key("a.b-c_d"), "a.b-c_d");
    }
}
