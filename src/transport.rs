//! Transport capability: an ordered, reliable byte-message channel to a
//! single remote peer.
//!
//! Mirrors `fs/async_fs.rs`'s `AsyncFileSystem` trait: an
//! object-safe async trait built by hand with a boxed future alias, rather
//! than `async_trait`, since the crate does not otherwise depend on it.
//! A `Transport` says nothing about *how* bytes reach the peer — a WebSocket,
//! a TCP stream, an in-process channel, and a relay are all valid
//! implementations; the Peer Protocol Driver only needs frames in, frames
//! out, and a way to know when the channel is gone.

use std::future::Future;
use std::pin::Pin;

use crate::error::Result;

/// A future boxed for storage behind a trait object, matching the
/// `BoxFuture` alias this pattern is known by elsewhere.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An ordered, reliable, message-framed channel to one remote peer.
///
/// Implementations are expected to preserve message boundaries (a `send`
/// of N bytes arrives as one `recv` of N bytes on the other end) — the wire
/// framing in [`crate::peer::wire`] relies on this.
pub trait Transport: Send + Sync {
    /// Send one frame. Resolves once the frame has been handed to the
    /// underlying channel (not necessarily acknowledged by the peer).
    fn send(&self, frame: Vec<u8>) -> BoxFuture<'_, Result<()>>;

    /// Receive the next frame. Resolves to `Ok(None)` once the channel is
    /// closed and no further frames will arrive.
    fn recv(&self) -> BoxFuture<'_, Result<Option<Vec<u8>>>>;

    /// Tear down the channel. Idempotent.
    fn close(&self) -> BoxFuture<'_, Result<()>>;
}

/// An in-memory, channel-backed `Transport`, useful for tests and for
/// wiring two engines together in the same process.
pub mod memory {
    use super::*;
    use tokio::sync::mpsc;
    use tokio::sync::Mutex as AsyncMutex;

    /// One endpoint of an in-memory duplex transport. Construct a connected
    /// pair with [`duplex`].
    pub struct MemoryTransport {
        tx: mpsc::UnboundedSender<Vec<u8>>,
        rx: AsyncMutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    }

    /// Build a pair of `MemoryTransport`s wired to each other: sending on
    /// one is receivable from the other.
    pub fn duplex() -> (MemoryTransport, MemoryTransport) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            MemoryTransport {
                tx: a_tx,
                rx: AsyncMutex::new(a_rx),
            },
            MemoryTransport {
                tx: b_tx,
                rx: AsyncMutex::new(b_rx),
            },
        )
    }

    impl Transport for MemoryTransport {
        fn send(&self, frame: Vec<u8>) -> BoxFuture<'_, Result<()>> {
            Box::pin(async move {
                // A closed receiver means the peer end was dropped; treat
                // this the same as any other transport going silent.
                let _ = self.tx.send(frame);
                Ok(())
            })
        }

        fn recv(&self) -> BoxFuture<'_, Result<Option<Vec<u8>>>> {
            Box::pin(async move { Ok(self.rx.lock().await.recv().await) })
        }

        fn close(&self) -> BoxFuture<'_, Result<()>> {
            Box::pin(async move {
                self.rx.lock().await.close();
                Ok(())
            })
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn duplex_delivers_in_order() {
            let (a, b) = duplex();
            a.send(vec![1]).await.unwrap();
            a.send(vec![2]).await.unwrap();
            assert_eq!(b.recv().await.unwrap(), Some(vec![1]));
            assert_eq!(b.recv().await.unwrap(), Some(vec![2]));
        }

        #[tokio::test]
        async fn close_ends_recv_with_none() {
            let (a, b) = duplex();
            a.close().await.unwrap();
            assert_eq!(a.recv().await.unwrap(), None);
            drop(b);
        }
    }
}
