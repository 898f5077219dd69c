//! Sparse in-memory block map shared between the step thread and workers.
#![forbid(unsafe_code)]

mod block;
mod error;
mod map;
mod store;

pub use block::{BlockPayload, GenState, MapBlock};
pub use error::MapError;
pub use map::VoxelMap;
pub use store::{BlockStore, MemoryStore, STORE_FORMAT_VERSION, StoreError};
