//! Threaded RFC 6455 WebSocket client.
//!
//! Plain `ws://` only. The [`Transport`] runs its network I/O on background
//! OS threads and reports through a [`TransportHandler`]; sends never block
//! on the network.

pub mod error;
pub mod frame;
pub mod handshake;
pub mod queue;
pub mod socket;
pub mod stats;
pub mod timer;
pub mod transport;
pub mod url;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;


pub use error::WsError;
pub use frame::{CloseFrame, Frame, FrameError, Opcode, close_code};
pub use stats::StatsSnapshot;
pub use timer::CancelToken;
pub use transport::{
    ChannelHandler, Message, Transport, TransportConfig, TransportEvent, TransportHandler,
    TransportState,
};
pub use url::WsUrl;
