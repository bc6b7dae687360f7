//! Session management: stable session keys, the binding router, the
//! session store and its append-only JSONL transcripts, and per-session
//! overrides.

pub mod overrides;
pub mod route;
pub mod session_key;
pub mod store;
pub mod transcript;

pub use overrides::{OverrideEntry, SessionOverrides};
pub use route::{resolve_route, MatchedBy, RouteRequest, RouteResult};
pub use session_key::{
    build_main_session_key, build_session_key, resolve_linked_peer_id, safe_file_key,
};
pub use store::{SessionEntry, SessionInit, SessionStore};
pub use transcript::TranscriptWriter;
