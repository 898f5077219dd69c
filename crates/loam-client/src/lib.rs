//! Receiving side: local block map, background meshing and acknowledgements.
#![forbid(unsafe_code)]

mod client;
pub mod config;

pub use client::{Client, ClientPhase, ClientStats, LocalPlayer};
pub use config::ClientConfig;

use loam_map::MapError;
use loam_net::{CodecError, TransportError};
use loam_runtime::RuntimeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("disconnected from server")]
    Disconnected,
    #[error("server speaks protocol {0}")]
    ProtocolMismatch(u16),
    #[error("handshake not finished")]
    NotReady,
    #[error(transparent)]
    Map(#[from] MapError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
