//! Wire protocol: JSON frames, handshake payload, presence snapshots,
//! and the typed gateway event vocabulary.
//!
//! Every connection is a duplex stream of JSON objects, one frame per
//! message. `type` discriminates the three variants: a request expects
//! exactly one response matched by `id`; events are unsolicited.
//! Broadcast events carry a monotone per-connection `seq`; presence
//! snapshots carry `stateVersion`.

mod frames;
mod hello;
mod methods;
mod presence;

pub use frames::*;
pub use hello::*;
pub use methods::*;
pub use presence::*;

/// Bumped whenever a frame or event shape changes incompatibly.
pub const PROTOCOL_VERSION: u32 = 3;
