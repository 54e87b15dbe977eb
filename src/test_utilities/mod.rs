//! In-memory sockets and mocks for tests.

pub mod mocks;

pub use mocks::{MockConnection, MockDialer};

use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};

use crate::error::RpcError;
use crate::networking::transport::{Frame, FrameSink, FrameStream};

/// The far end of a `memory_socket`.
pub struct MemoryPeer {
    frames: mpsc::UnboundedSender<Result<Frame, RpcError>>,
    written: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl MemoryPeer {
    pub fn send_data(&self, bytes: &[u8]) {
        self.send_frame(Frame::Data(bytes.to_vec()));
    }

    pub fn send_frame(&self, frame: Frame) {
        let _ = self.frames.unbounded_send(Ok(frame));
    }

    pub fn send_error(&self, err: RpcError) {
        let _ = self.frames.unbounded_send(Err(err));
    }

    /// Next message the connection wrote, None once it closed its side.
    pub async fn next_message(&mut self) -> Option<Vec<u8>> {
        self.written.next().await
    }
}

/// A socket pair; dropping the peer looks like the remote hanging up.
pub fn memory_socket() -> (FrameStream, FrameSink, MemoryPeer) {
    let (frames_tx, frames_rx) = mpsc::unbounded();
    let (written_tx, written_rx) = mpsc::unbounded();
    let sink = written_tx.sink_map_err(|err| RpcError::Socket(err.to_string()));
    (
        frames_rx.boxed(),
        Box::pin(sink),
        MemoryPeer {
            frames: frames_tx,
            written: written_rx,
        },
    )
}

/// Keeps a `stalled_socket` open without ever reading from it.
pub struct StalledPeer {
    _frames: mpsc::UnboundedSender<Result<Frame, RpcError>>,
    _written: mpsc::Receiver<Vec<u8>>,
}

/// A socket whose sink takes one message and then blocks forever.
pub fn stalled_socket() -> (FrameStream, FrameSink, StalledPeer) {
    let (frames_tx, frames_rx) = mpsc::unbounded();
    let (written_tx, written_rx) = mpsc::channel(0);
    let sink = written_tx.sink_map_err(|err| RpcError::Socket(err.to_string()));
    (
        frames_rx.boxed(),
        Box::pin(sink),
        StalledPeer {
            _frames: frames_tx,
            _written: written_rx,
        },
    )
}
