use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, unbounded};
use hashbrown::{HashMap, HashSet};
use loam_mesh_cpu::{BlockMesh, MeshInput, build_block_mesh};
use loam_world::{BlockPos, ContentTable};

use crate::{IDLE_WAIT, RuntimeError, panic_message};

#[derive(Clone, Debug)]
pub struct MeshTask {
    pub pos: BlockPos,
    pub input: MeshInput,
    pub ack: bool,
    pub urgent: bool,
}

#[derive(Default)]
struct MeshQueueState {
    order: VecDeque<BlockPos>,
    tasks: HashMap<BlockPos, MeshTask>,
    urgent: HashSet<BlockPos>,
}

impl MeshQueueState {
    fn take(&mut self, pos: BlockPos) -> Option<MeshTask> {
        let i = self.order.iter().position(|p| *p == pos)?;
        self.order.remove(i);
        self.urgent.remove(&pos);
        self.tasks.remove(&pos)
    }
}

/// Client-side queue of blocks waiting for a mesh. One task per position;
/// re-enqueueing replaces the snapshot and ORs the flags.
pub struct MeshBuildQueue {
    state: Mutex<MeshQueueState>,
    ready: Condvar,
    capacity: usize,
}

impl MeshBuildQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(MeshQueueState::default()),
            ready: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MeshQueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds or refreshes the task for `input.pos`. When the queue is full the
    /// oldest non-urgent task is evicted and returned; if every queued task
    /// is urgent, a non-urgent newcomer is returned instead.
    pub fn enqueue(&self, input: MeshInput, ack: bool, urgent: bool) -> Option<MeshTask> {
        let pos = input.pos;
        let mut st = self.lock();
        if let Some(task) = st.tasks.get_mut(&pos) {
            task.input = input;
            task.ack |= ack;
            task.urgent |= urgent;
            if urgent {
                st.urgent.insert(pos);
            }
            drop(st);
            self.ready.notify_one();
            return None;
        }
        let task = MeshTask {
            pos,
            input,
            ack,
            urgent,
        };
        let mut evicted = None;
        if st.tasks.len() >= self.capacity {
            let victim = st
                .order
                .iter()
                .copied()
                .find(|p| !st.urgent.contains(p));
            match victim {
                Some(victim) => evicted = st.take(victim),
                None if !urgent => return Some(task),
                None => {}
            }
        }
        st.order.push_back(pos);
        if urgent {
            st.urgent.insert(pos);
        }
        st.tasks.insert(pos, task);
        drop(st);
        self.ready.notify_one();
        evicted
    }

    fn dequeue_locked(st: &mut MeshQueueState) -> Option<MeshTask> {
        let pos = if st.urgent.is_empty() {
            *st.order.front()?
        } else {
            st.order.iter().copied().find(|p| st.urgent.contains(p))?
        };
        st.take(pos)
    }

    /// Urgent tasks first, otherwise the oldest task.
    pub fn dequeue_for_worker(&self) -> Option<MeshTask> {
        Self::dequeue_locked(&mut self.lock())
    }

    pub fn dequeue_blocking(&self, timeout: Duration) -> Option<MeshTask> {
        let mut st = self.lock();
        if st.order.is_empty() {
            st = self
                .ready
                .wait_timeout(st, timeout)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        Self::dequeue_locked(&mut st)
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

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn contains(&self, pos: BlockPos) -> bool {
        self.lock().tasks.contains_key(&pos)
    }
}

#[derive(Debug)]
pub struct MeshResult {
    pub pos: BlockPos,
    pub mesh: Option<BlockMesh>,
    pub ack: bool,
}

/// Single background thread turning mesh tasks into geometry.
pub struct MeshWorker {
    queue: Arc<MeshBuildQueue>,
    res_rx: Receiver<MeshResult>,
    keep_running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MeshWorker {
    pub fn spawn(
        queue: Arc<MeshBuildQueue>,
        content: Arc<ContentTable>,
    ) -> Result<Self, RuntimeError> {
        let (res_tx, res_rx) = unbounded::<MeshResult>();
        let keep_running = Arc::new(AtomicBool::new(true));
        let handle = {
            let queue = queue.clone();
            let keep_running = keep_running.clone();
            thread::Builder::new()
                .name("loam-mesh".to_string())
                .spawn(move || {
                    while keep_running.load(Ordering::Relaxed) {
                        let Some(task) = queue.dequeue_blocking(IDLE_WAIT) else {
                            continue;
                        };
                        let built =
                            catch_unwind(AssertUnwindSafe(|| build_block_mesh(&task.input, &content)));
                        let mesh = match built {
                            Ok(Ok(mesh)) => mesh,
                            Ok(Err(e)) => {
                                log::warn!("mesh {:?}: {}", task.pos, e);
                                None
                            }
                            Err(payload) => {
                                log::warn!(
                                    "mesh {:?}: mesher panicked: {}",
                                    task.pos,
                                    panic_message(payload.as_ref())
                                );
                                None
                            }
                        };
                        let out = MeshResult {
                            pos: task.pos,
                            mesh,
                            ack: task.ack,
                        };
                        if res_tx.send(out).is_err() {
                            break;
                        }
                    }
                })?
        };
        Ok(Self {
            queue,
            res_rx,
            keep_running,
            handle: Some(handle),
        })
    }

    pub fn drain_results(&self) -> Vec<MeshResult> {
        self.res_rx.try_iter().collect()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<MeshResult> {
        self.res_rx.recv_timeout(timeout).ok()
    }
}

impl Drop for MeshWorker {
    fn drop(&mut self) {
        self.keep_running.store(false, Ordering::Relaxed);
        self.queue.wake_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
