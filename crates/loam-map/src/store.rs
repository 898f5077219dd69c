use std::sync::{PoisonError, RwLock};

use hashbrown::HashMap;
use loam_world::BlockPos;
use thiserror::Error;

use crate::block::{BlockPayload, GenState, MapBlock};

/// Leading byte of every stored block.
pub const STORE_FORMAT_VERSION: u8 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("stored block {pos:?} is corrupt: {reason}")]
    Corrupt { pos: BlockPos, reason: String },
    #[error("stored block {pos:?} has format version {found}, expected {expected}")]
    VersionMismatch {
        pos: BlockPos,
        found: u8,
        expected: u8,
    },
    #[error("store i/o: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Errors the server cannot continue past.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::VersionMismatch { .. })
    }
}

/// Persistent block storage. Only "exists / does not exist" and the block
/// contents are part of the contract.
pub trait BlockStore: Send + Sync {
    fn load(&self, pos: BlockPos) -> Result<Option<MapBlock>, StoreError>;
    fn save(&self, block: &MapBlock) -> Result<(), StoreError>;
    fn contains(&self, pos: BlockPos) -> bool;
}

/// Versioned in-memory store holding the same bytes a disk backend would.
#[derive(Default)]
pub struct MemoryStore {
    blocks: RwLock<HashMap<BlockPos, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes raw bytes for `pos`, bypassing encoding.
    pub fn insert_raw(&self, pos: BlockPos, bytes: Vec<u8>) {
        self.blocks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pos, bytes);
    }

    pub fn len(&self) -> usize {
        self.blocks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn decode_stored(pos: BlockPos, bytes: &[u8]) -> Result<MapBlock, StoreError> {
    let (&version, body) = bytes.split_first().ok_or_else(|| StoreError::Corrupt {
        pos,
        reason: "empty record".to_string(),
    })?;
    if version != STORE_FORMAT_VERSION {
        return Err(StoreError::VersionMismatch {
            pos,
            found: version,
            expected: STORE_FORMAT_VERSION,
        });
    }
    let payload = BlockPayload::decode(body).map_err(|e| StoreError::Corrupt {
        pos,
        reason: e.to_string(),
    })?;
    Ok(payload.into_block(pos, GenState::LoadedFromStore))
}

impl BlockStore for MemoryStore {
    fn load(&self, pos: BlockPos) -> Result<Option<MapBlock>, StoreError> {
        let guard = self.blocks.read().unwrap_or_else(PoisonError::into_inner);
        match guard.get(&pos) {
            Some(bytes) => decode_stored(pos, bytes).map(Some),
            None => Ok(None),
        }
    }

    fn save(&self, block: &MapBlock) -> Result<(), StoreError> {
        let body = block.encode().map_err(|e| StoreError::Corrupt {
            pos: block.pos,
            reason: e.to_string(),
        })?;
        let mut bytes = Vec::with_capacity(body.len() + 1);
        bytes.push(STORE_FORMAT_VERSION);
        bytes.extend_from_slice(&body);
        self.insert_raw(block.pos, bytes);
        Ok(())
    }

    fn contains(&self, pos: BlockPos) -> bool {
        self.blocks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&pos)
    }
}
