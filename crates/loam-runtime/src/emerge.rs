use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use hashbrown::HashMap;
use loam_map::{BlockStore, GenState, MapBlock, MapError, VoxelMap};
use loam_net::PeerId;
use loam_world::{BlockGenerator, BlockPos};
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::{IDLE_WAIT, RuntimeError, panic_message};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EmergeLimits {
    pub total: usize,
    pub diskonly_per_peer: usize,
    pub generate_per_peer: usize,
}

impl EmergeLimits {
    pub const DEFAULT_TOTAL: usize = 256;

    /// Per-peer limits scale with the worker count.
    pub fn for_workers(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            total: Self::DEFAULT_TOTAL,
            diskonly_per_peer: workers * 5 + 1,
            generate_per_peer: workers + 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmergeTask {
    pub pos: BlockPos,
    pub requesters: Vec<PeerId>,
    pub allow_generate: bool,
}

#[derive(Default)]
struct QueueState {
    order: VecDeque<BlockPos>,
    tasks: HashMap<BlockPos, EmergeTask>,
    per_peer: HashMap<PeerId, usize>,
}

impl QueueState {
    fn release(&mut self, task: &EmergeTask) {
        for peer in &task.requesters {
            if let Some(n) = self.per_peer.get_mut(peer) {
                *n = n.saturating_sub(1);
                if *n == 0 {
                    self.per_peer.remove(peer);
                }
            }
        }
    }
}

/// Deduplicated queue of positions waiting for data.
pub struct EmergeQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
    limits: EmergeLimits,
}

impl EmergeQueue {
    pub fn new(limits: EmergeLimits) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            ready: Condvar::new(),
            limits,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn limits(&self) -> EmergeLimits {
        self.limits
    }

    /// Requests data for `pos`. Merges into a queued task when one exists,
    /// which always succeeds. A new task is rejected once the queue or the
    /// requesting peer is at its limit; the caller retries later.
    pub fn push(&self, pos: BlockPos, peer: PeerId, allow_generate: bool) -> bool {
        let mut st = self.lock();
        if let Some(task) = st.tasks.get_mut(&pos) {
            task.allow_generate |= allow_generate;
            if !task.requesters.contains(&peer) {
                task.requesters.push(peer);
                *st.per_peer.entry(peer).or_insert(0) += 1;
            }
            return true;
        }
        if st.tasks.len() >= self.limits.total {
            return false;
        }
        let queued = st.per_peer.get(&peer).copied().unwrap_or(0);
        let over = if peer == PeerId::SERVER {
            queued * 2 >= self.limits.total
        } else if allow_generate {
            queued >= self.limits.generate_per_peer
        } else {
            queued >= self.limits.diskonly_per_peer
        };
        if over {
            return false;
        }
        st.tasks.insert(
            pos,
            EmergeTask {
                pos,
                requesters: vec![peer],
                allow_generate,
            },
        );
        st.order.push_back(pos);
        *st.per_peer.entry(peer).or_insert(0) += 1;
        drop(st);
        self.ready.notify_one();
        true
    }

    fn pop_locked(st: &mut QueueState) -> Option<EmergeTask> {
        while let Some(pos) = st.order.pop_front() {
            if let Some(task) = st.tasks.remove(&pos) {
                st.release(&task);
                return Some(task);
            }
        }
        None
    }

    pub fn try_pop(&self) -> Option<EmergeTask> {
        Self::pop_locked(&mut self.lock())
    }

    /// Waits up to `timeout` for a task.
    pub fn pop_blocking(&self, timeout: Duration) -> Option<EmergeTask> {
        let mut st = self.lock();
        if st.order.is_empty() {
            st = self
                .ready
                .wait_timeout(st, timeout)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        Self::pop_locked(&mut st)
    }

    /// Drops `peer` from every queued task. Tasks keep running for any
    /// remaining requesters.
    pub fn forget_peer(&self, peer: PeerId) {
        let mut st = self.lock();
        for task in st.tasks.values_mut() {
            task.requesters.retain(|p| *p != peer);
        }
        st.per_peer.remove(&peer);
    }

    pub fn wake_all(&self) {
        self.ready.notify_all();
    }

    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, pos: BlockPos) -> bool {
        self.lock().tasks.contains_key(&pos)
    }

    pub fn task(&self, pos: BlockPos) -> Option<EmergeTask> {
        self.lock().tasks.get(&pos).cloned()
    }

    pub fn peer_count(&self, peer: PeerId) -> usize {
        self.lock().per_peer.get(&peer).copied().unwrap_or(0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EmergeOutcome {
    /// Already in the map; only post-processing ran.
    FromMemory,
    FromStore,
    Generated,
    /// Absent from the store and generation was not allowed.
    Cancelled,
    OverLimit,
    /// Transient failure; the position may be requested again.
    Failed(String),
    /// The store cannot be trusted; the server must stop.
    Fatal(String),
}

impl EmergeOutcome {
    /// Whether the map now holds usable data for the position.
    pub fn is_loaded(&self) -> bool {
        matches!(
            self,
            EmergeOutcome::FromMemory | EmergeOutcome::FromStore | EmergeOutcome::Generated
        )
    }
}

#[derive(Clone, Debug)]
pub struct EmergeResult {
    pub pos: BlockPos,
    pub requesters: Vec<PeerId>,
    pub outcome: EmergeOutcome,
}

fn commit(map: &VoxelMap, block: MapBlock, fresh: EmergeOutcome) -> EmergeOutcome {
    match map.commit_emerged(block) {
        Ok(()) => fresh,
        // Loaded by someone else in the meantime.
        Err(MapError::AlreadyGenerated(_)) => EmergeOutcome::FromMemory,
        Err(e) => EmergeOutcome::Failed(e.to_string()),
    }
}

/// Resolves one task against the map, the store and the generator. The map
/// write is finished before this returns.
pub fn process_emerge_task(
    task: &EmergeTask,
    map: &VoxelMap,
    store: &dyn BlockStore,
    generator: &dyn BlockGenerator,
) -> EmergeOutcome {
    let pos = task.pos;
    if pos.over_limit() {
        return EmergeOutcome::OverLimit;
    }

    if map.is_usable(pos) {
        let now = map.now_ms();
        map.with_block_mut(pos, |b| {
            b.last_touched = now;
            b.recompute_day_night();
        });
        return EmergeOutcome::FromMemory;
    }

    match store.load(pos) {
        Ok(Some(block)) => return commit(map, block, EmergeOutcome::FromStore),
        Ok(None) => {}
        Err(e) if e.is_fatal() => return EmergeOutcome::Fatal(e.to_string()),
        Err(e) => {
            log::warn!("emerge {:?}: {}; treating as absent", pos, e);
        }
    }

    if !task.allow_generate {
        map.insert_dummy(pos);
        return EmergeOutcome::Cancelled;
    }

    match catch_unwind(AssertUnwindSafe(|| generator.generate(pos))) {
        Ok(nodes) => commit(
            map,
            MapBlock::from_nodes(pos, nodes, GenState::Generated),
            EmergeOutcome::Generated,
        ),
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            log::warn!("emerge {:?}: generator panicked: {}", pos, msg);
            EmergeOutcome::Failed(format!("generator panicked: {msg}"))
        }
    }
}

/// Emerge worker pool. Results are drained by the server step.
pub struct EmergeWorkers {
    queue: Arc<EmergeQueue>,
    res_rx: Receiver<EmergeResult>,
    exit_rx: Receiver<()>,
    keep_running: Arc<AtomicBool>,
    inflight: Arc<AtomicUsize>,
    _pool: Arc<ThreadPool>,
    workers: usize,
    stopped: bool,
}

impl EmergeWorkers {
    pub fn new(
        workers: usize,
        queue: Arc<EmergeQueue>,
        map: Arc<VoxelMap>,
        store: Arc<dyn BlockStore>,
        generator: Arc<dyn BlockGenerator>,
    ) -> Result<Self, RuntimeError> {
        let workers = workers.max(1);
        let (res_tx, res_rx) = unbounded::<EmergeResult>();
        let (exit_tx, exit_rx) = unbounded::<()>();
        let keep_running = Arc::new(AtomicBool::new(true));
        let inflight = Arc::new(AtomicUsize::new(0));
        let pool = Arc::new(
            ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(|i| format!("loam-emerge-{i}"))
                .build()?,
        );
        for _ in 0..workers {
            let queue = queue.clone();
            let map = map.clone();
            let store = store.clone();
            let generator = generator.clone();
            let keep_running = keep_running.clone();
            let inflight = inflight.clone();
            let tx: Sender<EmergeResult> = res_tx.clone();
            let exit_tx = exit_tx.clone();
            pool.spawn(move || {
                while keep_running.load(Ordering::Relaxed) {
                    let Some(task) = queue.pop_blocking(IDLE_WAIT) else {
                        continue;
                    };
                    inflight.fetch_add(1, Ordering::Relaxed);
                    let outcome =
                        process_emerge_task(&task, map.as_ref(), store.as_ref(), generator.as_ref());
                    inflight.fetch_sub(1, Ordering::Relaxed);
                    let result = EmergeResult {
                        pos: task.pos,
                        requesters: task.requesters,
                        outcome,
                    };
                    if tx.send(result).is_err() {
                        break;
                    }
                }
                let _ = exit_tx.send(());
            });
        }
        log::info!("started {} emerge workers", workers);
        Ok(Self {
            queue,
            res_rx,
            exit_rx,
            keep_running,
            inflight,
            _pool: pool,
            workers,
            stopped: false,
        })
    }

    pub fn queue(&self) -> &Arc<EmergeQueue> {
        &self.queue
    }

    pub fn drain_results(&self) -> Vec<EmergeResult> {
        self.res_rx.try_iter().collect()
    }

    /// Blocks until a result arrives or `timeout` passes.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<EmergeResult> {
        self.res_rx.recv_timeout(timeout).ok()
    }

    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Relaxed)
    }

    /// Stops the workers and waits for them to leave their loops.
    pub fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.keep_running.store(false, Ordering::Relaxed);
        self.queue.wake_all();
        for _ in 0..self.workers {
            if self.exit_rx.recv_timeout(Duration::from_secs(5)).is_err() {
                log::warn!("emerge worker did not stop in time");
                break;
            }
        }
    }
}

impl Drop for EmergeWorkers {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loam_map::MemoryStore;
    use loam_world::{FlatGenerator, Node};

    struct Exploding;

    impl BlockGenerator for Exploding {
        fn generate(&self, _pos: BlockPos) -> Vec<Node> {
            panic!("boom");
        }
    }

    fn task(pos: BlockPos, allow_generate: bool) -> EmergeTask {
        EmergeTask {
            pos,
            requesters: vec![PeerId(1)],
            allow_generate,
        }
    }

    #[test]
    fn merge_unions_requesters_and_ors_generation() {
        let q = EmergeQueue::new(EmergeLimits::for_workers(1));
        let pos = BlockPos::new(1, 1, 1);
        assert!(q.push(pos, PeerId(1), false));
        assert!(q.push(pos, PeerId(2), true));
        assert!(q.push(pos, PeerId(2), false));
        assert_eq!(q.len(), 1);
        let t = q.try_pop().unwrap();
        assert!(t.allow_generate);
        assert_eq!(t.requesters, vec![PeerId(1), PeerId(2)]);
        assert_eq!(q.peer_count(PeerId(1)), 0);
        assert_eq!(q.peer_count(PeerId(2)), 0);
    }

    #[test]
    fn per_peer_generate_limit_applies_to_new_tasks_only() {
        let limits = EmergeLimits::for_workers(1);
        let q = EmergeQueue::new(limits);
        for x in 0..limits.generate_per_peer as i32 {
            assert!(q.push(BlockPos::new(x, 0, 0), PeerId(1), true));
        }
        assert!(!q.push(BlockPos::new(100, 0, 0), PeerId(1), true));
        // Another peer is unaffected; merging is always accepted.
        assert!(q.push(BlockPos::new(100, 0, 0), PeerId(2), true));
        assert!(q.push(BlockPos::new(100, 0, 0), PeerId(1), true));
    }

    #[test]
    fn total_limit_rejects() {
        let q = EmergeQueue::new(EmergeLimits {
            total: 2,
            diskonly_per_peer: 10,
            generate_per_peer: 10,
        });
        assert!(q.push(BlockPos::new(0, 0, 0), PeerId(1), false));
        assert!(q.push(BlockPos::new(1, 0, 0), PeerId(2), false));
        assert!(!q.push(BlockPos::new(2, 0, 0), PeerId(3), false));
    }

    #[test]
    fn pop_blocking_times_out_when_empty() {
        let q = EmergeQueue::new(EmergeLimits::for_workers(1));
        assert!(q.pop_blocking(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn generates_then_serves_from_memory() {
        let map = VoxelMap::new();
        let store = MemoryStore::new();
        let g = FlatGenerator::new(4);
        let pos = BlockPos::new(0, 0, 0);
        assert_eq!(
            process_emerge_task(&task(pos, true), &map, &store, &g),
            EmergeOutcome::Generated
        );
        assert_eq!(map.state(pos), Some(GenState::Generated));
        assert_eq!(
            process_emerge_task(&task(pos, true), &map, &store, &g),
            EmergeOutcome::FromMemory
        );
    }

    #[test]
    fn disallowed_generation_leaves_dummy() {
        let map = VoxelMap::new();
        let store = MemoryStore::new();
        let pos = BlockPos::new(0, 2, 0);
        let out = process_emerge_task(&task(pos, false), &map, &store, &FlatGenerator::new(0));
        assert_eq!(out, EmergeOutcome::Cancelled);
        assert_eq!(map.state(pos), Some(GenState::Unloaded));
    }

    #[test]
    fn store_hit_is_loaded_from_store() {
        let map = VoxelMap::new();
        let store = MemoryStore::new();
        let pos = BlockPos::new(3, 0, 0);
        store
            .save(&MapBlock::from_nodes(pos, Vec::new(), GenState::Generated))
            .unwrap();
        let out = process_emerge_task(&task(pos, false), &map, &store, &Exploding);
        assert_eq!(out, EmergeOutcome::FromStore);
        assert_eq!(map.state(pos), Some(GenState::LoadedFromStore));
    }

    #[test]
    fn corrupt_store_entry_falls_back_to_generation() {
        let map = VoxelMap::new();
        let store = MemoryStore::new();
        let pos = BlockPos::new(0, 0, 0);
        store.insert_raw(pos, vec![loam_map::STORE_FORMAT_VERSION, 1, 2, 3]);
        let out = process_emerge_task(&task(pos, true), &map, &store, &FlatGenerator::new(4));
        assert_eq!(out, EmergeOutcome::Generated);
    }

    #[test]
    fn version_mismatch_is_fatal() {
        let map = VoxelMap::new();
        let store = MemoryStore::new();
        let pos = BlockPos::new(0, 0, 0);
        store.insert_raw(pos, vec![99, 0, 0, 0]);
        let out = process_emerge_task(&task(pos, true), &map, &store, &FlatGenerator::new(4));
        assert!(matches!(out, EmergeOutcome::Fatal(_)));
    }

    #[test]
    fn generator_panic_is_contained() {
        let map = VoxelMap::new();
        let store = MemoryStore::new();
        let pos = BlockPos::new(0, 0, 0);
        let out = process_emerge_task(&task(pos, true), &map, &store, &Exploding);
        assert!(matches!(out, EmergeOutcome::Failed(_)));
        assert!(!map.contains(pos));
    }

    #[test]
    fn over_limit_is_skipped() {
        let map = VoxelMap::new();
        let store = MemoryStore::new();
        let pos = BlockPos::new(100_000, 0, 0);
        let out = process_emerge_task(&task(pos, true), &map, &store, &FlatGenerator::new(4));
        assert_eq!(out, EmergeOutcome::OverLimit);
    }
}
