//! Authoritative world server: block emerge, per-client send scheduling and
//! edit fan-out over a [`loam_net::Transport`].
#![forbid(unsafe_code)]

pub mod config;
pub mod dispatcher;
pub mod peers;
pub mod scheduler;
mod server;
pub mod sight;

pub use config::{ServerConfig, load_server_config_from_path};
pub use dispatcher::{Candidate, DispatchStats, GlobalSendDispatcher, select_transfers};
pub use peers::{BlockSendState, ClientState, PeerBlockStates, PeerRegistry, RemoteClient};
pub use scheduler::{PlayerView, Priority, ScanContext, SendLimits, SendScheduler};
pub use server::{Server, ServerStats};

use loam_map::{MapError, StoreError};
use loam_net::CodecError;
use loam_runtime::RuntimeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    /// The map store is unusable; the server must stop.
    #[error("fatal map error: {0}")]
    Fatal(String),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Map(#[from] MapError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}
