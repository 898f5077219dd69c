//! Protocol commands, their wire codec and the transport seam.
#![forbid(unsafe_code)]

mod codec;
mod command;
mod transport;

pub use codec::{CodecError, MAX_FRAME_LEN, MIN_FRAME_LEN, decode, encode};
pub use command::{Command, Direction, PROTOCOL_VERSION, PlayerPos};
pub use transport::{
    LoopbackClient, LoopbackHub, LoopbackServer, PeerId, Transport, TransportError,
    TransportEvent,
};
