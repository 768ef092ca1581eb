//! Peer Protocol Driver: the per-peer state machine.
//!
//! One `PeerSession` owns one `Transport` and drives it through
//! `Handshake → Synchronizing ⇄ Reconnecting → Closed`. Grounded on
//! `crdt/sync_manager.rs`'s `RustSyncManager` for the "track per-document
//! sync state, react to inbound sync messages, emit replies" shape, and on
//! the Tauri app's `websocket_sync.rs::run_sync_loop` for the exponential
//! backoff-with-jitter reconnect loop.
//!
//! The session never decides document content — every inbound update is
//! handed straight to the [`Vfs`], whose CRDT merge is the sole authority.
//! This driver's job is purely: frame bytes on the wire, track which
//! documents are in flight, and keep the connection alive across brief
//! silences.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use yrs::StateVector;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::peer::wire::{DocKey, DocRequestPayload, DocSyncPayload, Frame, HelloPayload, SyncMessage};
use crate::transport::Transport;
use crate::vfs::{Delta, Vfs};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Handshake,
    Synchronizing,
    Reconnecting,
    Closed,
}

/// Drive one peer session to completion (until the peer disconnects, the
/// caller cancels via `cancelled`, or reconnect attempts are exhausted).
/// Returns once the transport is closed.
pub async fn run(
    local_peer_id: String,
    transport: Arc<dyn Transport>,
    vfs: Arc<Vfs>,
    mut local_deltas: broadcast::Receiver<Delta>,
    config: EngineConfig,
    cancelled: Arc<AtomicBool>,
) {
    let mut state = SessionState::Handshake;
    // Per-document state vector last known to be synced with this peer —
    // used to resend SyncStep1 for everything in flight after a reconnect.
    let mut tracked: HashMap<DocKey, ()> = HashMap::new();
    let mut pending: Vec<Frame> = Vec::new();
    let mut attempt: u32 = 0;

    if send_frame(&transport, &Frame::Hello(HelloPayload {
        protocol_version: 1,
        peer_id: local_peer_id,
        known_doc_ids: vec![],
    }))
    .await
    .is_err()
    {
        return;
    }

    loop {
        if cancelled.load(Ordering::SeqCst) {
            state = SessionState::Closed;
        }

        state = match state {
            SessionState::Handshake => {
                match recv_with_timeout(&transport, config.peer_idle_timeout).await {
                    RecvResult::Frame(Frame::Hello(_)) => {
                        tracked.insert(DocKey::Tree, ());
                        let sv = vfs.store().tree_state_vector();
                        let _ = send_frame(
                            &transport,
                            &Frame::DocSync(DocSyncPayload {
                                key: DocKey::Tree,
                                message: SyncMessage::SyncStep1(sv.encode_v1()),
                            }),
                        )
                        .await;
                        SessionState::Synchronizing
                    }
                    RecvResult::Frame(_) => SessionState::Handshake,
                    RecvResult::Timeout => SessionState::Handshake,
                    RecvResult::Closed | RecvResult::Error => SessionState::Closed,
                }
            }

            SessionState::Synchronizing => {
                tokio::select! {
                    outcome = recv_with_timeout(&transport, config.peer_idle_timeout) => {
                        match outcome {
                            RecvResult::Frame(frame) => {
                                handle_frame(frame, &vfs, &transport, &mut tracked).await;
                                SessionState::Synchronizing
                            }
                            RecvResult::Timeout => {
                                log::warn!("peer session idle past timeout, reconnecting");
                                attempt = 0;
                                SessionState::Reconnecting
                            }
                            RecvResult::Closed | RecvResult::Error => SessionState::Closed,
                        }
                    }
                    delta = local_deltas.recv() => {
                        match delta {
                            Ok(delta) => {
                                let _ = forward_local_delta(&transport, delta).await;
                                SessionState::Synchronizing
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                log::warn!("peer session local delta channel lagged by {n}, continuing");
                                SessionState::Synchronizing
                            }
                            Err(broadcast::error::RecvError::Closed) => SessionState::Closed,
                        }
                    }
                }
            }

            SessionState::Reconnecting => {
                if attempt >= config.max_reconnect_attempts {
                    log::warn!("peer session exhausted reconnect attempts, closing");
                    SessionState::Closed
                } else {
                    let delay = backoff_delay(&config, attempt);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    match recv_with_timeout(&transport, config.peer_idle_timeout).await {
                        RecvResult::Frame(Frame::Hello(_)) => {
                            attempt = 0;
                            // Resume: re-announce everything we were tracking.
                            for key in tracked.keys().cloned().collect::<Vec<_>>() {
                                let sv = state_vector_for(&vfs, &key);
                                if let Ok(sv) = sv {
                                    let _ = send_frame(
                                        &transport,
                                        &Frame::DocSync(DocSyncPayload {
                                            key,
                                            message: SyncMessage::SyncStep1(sv.encode_v1()),
                                        }),
                                    )
                                    .await;
                                }
                            }
                            for frame in pending.drain(..) {
                                handle_frame(frame, &vfs, &transport, &mut tracked).await;
                            }
                            SessionState::Synchronizing
                        }
                        RecvResult::Frame(frame) => {
                            if pending.len() < config.reconnect_buffer_size {
                                pending.push(frame);
                            }
                            SessionState::Reconnecting
                        }
                        RecvResult::Timeout => SessionState::Reconnecting,
                        RecvResult::Closed | RecvResult::Error => SessionState::Reconnecting,
                    }
                }
            }

            SessionState::Closed => break,
        };
    }

    let _ = transport.close().await;
}

fn backoff_delay(config: &EngineConfig, attempt: u32) -> Duration {
    let scaled = config.reconnect_backoff_base.saturating_mul(1u32 << attempt.min(16));
    let capped = scaled.min(config.reconnect_backoff_max);
    // Full jitter: uniform in [0, capped]. `attempt` seeds the split so two
    // peers racing a reconnect do not retry in lockstep.
    let jitter_fraction = ((attempt as u64 * 2654435761) % 1000) as u32;
    capped.mul_f64(jitter_fraction as f64 / 1000.0).max(config.reconnect_backoff_base / 4)
}

enum RecvResult {
    Frame(Frame),
    Timeout,
    Closed,
    Error,
}

async fn recv_with_timeout(transport: &Arc<dyn Transport>, timeout: Duration) -> RecvResult {
    match tokio::time::timeout(timeout, transport.recv()).await {
        Ok(Ok(Some(bytes))) => match Frame::decode(&bytes) {
            Ok(frame) => RecvResult::Frame(frame),
            Err(e) => {
                log::warn!("malformed frame from peer, closing session: {e}");
                RecvResult::Error
            }
        },
        Ok(Ok(None)) => RecvResult::Closed,
        Ok(Err(e)) => {
            log::warn!("transport error receiving frame: {e}");
            RecvResult::Error
        }
        Err(_elapsed) => RecvResult::Timeout,
    }
}

async fn send_frame(transport: &Arc<dyn Transport>, frame: &Frame) -> Result<()> {
    let bytes = frame.encode()?;
    transport.send(bytes).await
}

async fn forward_local_delta(transport: &Arc<dyn Transport>, delta: Delta) -> Result<()> {
    let payload = match delta {
        Delta::Tree(bytes) => DocSyncPayload {
            key: DocKey::Tree,
            message: SyncMessage::Update(bytes),
        },
        Delta::Content(id, bytes) => DocSyncPayload {
            key: DocKey::Content(id),
            message: SyncMessage::Update(bytes),
        },
    };
    send_frame(transport, &Frame::DocSync(payload)).await
}

/// After merging a tree update, ask the peer to start sync for any file
/// this side now knows about (by id) but has not yet exchanged content for.
/// A `SyncStep1`/`DocRequest` alone only ever negotiates the tree itself —
/// without this, a peer that connects after a file already exists would see
/// the tree entry but never actually receive the file's content.
async fn request_newly_linked_content(
    vfs: &Arc<Vfs>,
    transport: &Arc<dyn Transport>,
    tracked: &mut HashMap<DocKey, ()>,
) {
    let ids = {
        let tree_handle = vfs.store().tree();
        let tree = tree_handle.lock().unwrap();
        tree.all_file_ids()
    };
    let Ok(ids) = ids else { return };
    for id in ids {
        let key = DocKey::Content(id);
        if tracked.contains_key(&key) {
            continue;
        }
        tracked.insert(key.clone(), ());
        let _ = send_frame(transport, &Frame::DocRequest(DocRequestPayload { key })).await;
    }
}

fn state_vector_for(vfs: &Arc<Vfs>, key: &DocKey) -> Result<StateVector> {
    match key {
        DocKey::Tree => Ok(vfs.store().tree_state_vector()),
        DocKey::Content(id) => vfs.store().content_state_vector(id),
    }
}

async fn handle_frame(
    frame: Frame,
    vfs: &Arc<Vfs>,
    transport: &Arc<dyn Transport>,
    tracked: &mut HashMap<DocKey, ()>,
) {
    match frame {
        Frame::Hello(_) => {
            // A redundant Hello once synchronizing; nothing to do.
        }
        Frame::DocSync(DocSyncPayload { key, message }) => {
            tracked.insert(key.clone(), ());
            let is_tree = matches!(key, DocKey::Tree);
            if let Err(e) = apply_sync_message(vfs, transport, &key, message).await {
                log::warn!("discarding invalid change for {key:?}: {e}");
            } else if is_tree {
                request_newly_linked_content(vfs, transport, tracked).await;
            }
        }
        Frame::DocRequest(DocRequestPayload { key }) => {
            if let Ok(sv) = state_vector_for(vfs, &key) {
                let _ = send_frame(
                    transport,
                    &Frame::DocSync(DocSyncPayload {
                        key,
                        message: SyncMessage::SyncStep1(sv.encode_v1()),
                    }),
                )
                .await;
            }
        }
        Frame::Bye(payload) => {
            log::debug!("peer said goodbye: {}", payload.reason);
        }
    }
}

async fn apply_sync_message(
    vfs: &Arc<Vfs>,
    transport: &Arc<dyn Transport>,
    key: &DocKey,
    message: SyncMessage,
) -> Result<()> {
    match message {
        SyncMessage::SyncStep1(remote_sv_bytes) => {
            let remote_sv = StateVector::decode_v1(&remote_sv_bytes)
                .map_err(|e| Error::InvalidChange(format!("bad state vector: {e}")))?;
            let diff = match key {
                DocKey::Tree => vfs.store().tree_encode_diff(&remote_sv),
                DocKey::Content(id) => vfs.store().content_encode_diff(id, &remote_sv)?,
            };
            send_frame(
                transport,
                &Frame::DocSync(DocSyncPayload {
                    key: key.clone(),
                    message: SyncMessage::SyncStep2(diff),
                }),
            )
            .await
        }
        SyncMessage::SyncStep2(update) | SyncMessage::Update(update) => {
            if update.is_empty() {
                return Ok(());
            }
            match key {
                DocKey::Tree => vfs.apply_remote_tree_delta(&update),
                DocKey::Content(id) => vfs.apply_remote_content_delta(id, &update),
            }
        }
    }
}
