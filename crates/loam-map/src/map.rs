use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use hashbrown::HashMap;
use loam_world::{BlockPos, Node, NodePos};

use crate::block::{GenState, MapBlock};
use crate::error::MapError;
use crate::store::{BlockStore, StoreError};

/// Sparse block store guarded by a single lock.
///
/// Every mutation takes the guard internally, so callers never hold it across
/// a channel send or another lock. Readers get copies or closure access.
pub struct VoxelMap {
    blocks: RwLock<HashMap<BlockPos, MapBlock>>,
    epoch: Instant,
}

impl Default for VoxelMap {
    fn default() -> Self {
        Self::new()
    }
}

impl VoxelMap {
    pub fn new() -> Self {
        Self {
            blocks: RwLock::new(HashMap::new()),
            epoch: Instant::now(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<BlockPos, MapBlock>> {
        self.blocks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<BlockPos, MapBlock>> {
        self.blocks.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Milliseconds since the map was created; used for `last_touched`.
    pub fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
    }

    pub fn with_block<R>(&self, pos: BlockPos, f: impl FnOnce(&MapBlock) -> R) -> Option<R> {
        self.read().get(&pos).map(f)
    }

    pub fn with_block_mut<R>(
        &self,
        pos: BlockPos,
        f: impl FnOnce(&mut MapBlock) -> R,
    ) -> Option<R> {
        self.write().get_mut(&pos).map(f)
    }

    pub fn contains(&self, pos: BlockPos) -> bool {
        self.read().contains_key(&pos)
    }

    pub fn state(&self, pos: BlockPos) -> Option<GenState> {
        self.with_block(pos, |b| b.state)
    }

    pub fn is_usable(&self, pos: BlockPos) -> bool {
        self.state(pos).is_some_and(GenState::is_usable)
    }

    pub fn snapshot(&self, pos: BlockPos) -> Option<MapBlock> {
        self.with_block(pos, MapBlock::clone)
    }

    /// Inserts or replaces a block, returning the previous one.
    pub fn insert(&self, mut block: MapBlock) -> Option<MapBlock> {
        block.last_touched = self.now_ms();
        self.write().insert(block.pos, block)
    }

    /// Records that `pos` was not found in the store. No-op if anything is
    /// already present.
    pub fn insert_dummy(&self, pos: BlockPos) -> bool {
        let now = self.now_ms();
        let mut guard = self.write();
        if guard.contains_key(&pos) {
            return false;
        }
        let mut dummy = MapBlock::dummy(pos);
        dummy.last_touched = now;
        guard.insert(pos, dummy);
        true
    }

    /// Installs the result of an emerge. Refuses to replace a block that
    /// already holds usable data.
    pub fn commit_emerged(&self, mut block: MapBlock) -> Result<(), MapError> {
        let now = self.now_ms();
        let mut guard = self.write();
        if guard.get(&block.pos).is_some_and(|b| b.state.is_usable()) {
            return Err(MapError::AlreadyGenerated(block.pos));
        }
        block.last_touched = now;
        if block.state == GenState::Generated {
            block.modified = true;
        }
        guard.insert(block.pos, block);
        Ok(())
    }

    pub fn remove(&self, pos: BlockPos) -> Option<MapBlock> {
        self.write().remove(&pos)
    }

    /// Removes every block matching `pred` and returns their positions.
    pub fn remove_where(&self, mut pred: impl FnMut(&MapBlock) -> bool) -> Vec<BlockPos> {
        let mut guard = self.write();
        let doomed: Vec<BlockPos> = guard
            .values()
            .filter(|b| pred(b))
            .map(|b| b.pos)
            .collect();
        for pos in &doomed {
            guard.remove(pos);
        }
        doomed
    }

    pub fn touch(&self, pos: BlockPos) -> bool {
        let now = self.now_ms();
        self.with_block_mut(pos, |b| b.last_touched = now).is_some()
    }

    pub fn get_node(&self, p: NodePos) -> Option<Node> {
        self.with_block(p.block(), |b| b.get(p)).flatten()
    }

    pub fn set_node(&self, p: NodePos, node: Node) -> Result<(), MapError> {
        let now = self.now_ms();
        self.with_block_mut(p.block(), |b| -> Result<(), MapError> {
            b.set(p, node)?;
            b.last_touched = now;
            Ok(())
        })
        .unwrap_or(Err(MapError::NotLoaded(p.block())))
    }

    pub fn positions(&self) -> Vec<BlockPos> {
        self.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Writes every modified usable block to `store` and clears the flags.
    pub fn save_modified(&self, store: &dyn BlockStore) -> Result<usize, StoreError> {
        let mut guard = self.write();
        let mut saved = 0;
        for block in guard.values_mut() {
            if block.modified && block.state.is_usable() {
                store.save(block)?;
                block.modified = false;
                saved += 1;
            }
        }
        if saved > 0 {
            log::debug!("saved {} modified blocks", saved);
        }
        Ok(saved)
    }
}
