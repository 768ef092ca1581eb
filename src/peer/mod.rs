//! Peer Protocol Driver: handshake, sync-message framing,
//! per-document sync state, and reconnection, multiplexed over one
//! [`crate::transport::Transport`] per peer.
//!
//! The driver itself is a free function ([`session::run`]) rather than a
//! struct with methods — it owns nothing the rest of the engine needs to
//! reach into once started, matching the arena-of-sessions design: the
//! [`crate::engine::Engine`] holds only an integer [`PeerId`] and a
//! cancellation flag per running session, never a reference back into it.

pub mod session;
pub mod wire;

/// Opaque handle to a connected peer session. Arena-indexed (not a pointer
/// or reference) so the engine never holds a raw cross-reference into a
/// session's task state — replacing the reference-cycle-prone
/// engine-owns-sessions/sessions-own-engine pattern a garbage-collected
/// implementation might use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(pub(crate) u64);
