use loam_world::BlockPos;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum MapError {
    #[error("block {0:?} is not loaded")]
    NotLoaded(BlockPos),
    #[error("block {0:?} is already generated")]
    AlreadyGenerated(BlockPos),
    #[error("block payload holds {found} nodes, expected {expected}")]
    PayloadSize { expected: usize, found: usize },
    #[error("block payload: {0}")]
    Payload(#[from] bincode::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}
