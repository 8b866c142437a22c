//! Client for multiworld randomizer servers.
//!
//! [`Session`] speaks the JSON packet protocol over a `ws_client`
//! [`Transport`](ws_client::Transport): it performs the RoomInfo → Connect →
//! Connected handshake, mirrors the slot's checked locations and received
//! items, and reconnects after a dropped connection. Events are queued for
//! the application rather than delivered on network threads.

pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod packet;
pub mod session;
pub mod state;

pub use config::{FileConfig, ServerConfig, SessionConfig, load_config};
pub use error::{ErrorKind, PacketError, SessionError};
pub use event::{Callbacks, SessionEvent};
pub use packet::{
    ClientStatus, NetworkItem, NetworkPlayer, NetworkVersion, Packet, Permission, RoomInfo,
};
pub use session::{Session, SessionState};
pub use state::{PendingCheck, PendingChecks, ReceivedOutcome, SessionSnapshot};
