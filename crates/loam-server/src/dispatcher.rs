use loam_map::VoxelMap;
use loam_net::{Command, PeerId, Transport, encode};
use loam_runtime::EmergeQueue;
use loam_world::BlockPos;

use crate::peers::PeerRegistry;
use crate::scheduler::{Priority, ScanContext, SendLimits};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub peer: PeerId,
    pub pos: BlockPos,
    pub priority: Priority,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub collected: usize,
    pub sent: usize,
    pub released: usize,
    pub failed: usize,
}

/// Splits `candidates` into those that fit the server-wide budget and the
/// rest. Lower priority values win; ties keep collection order.
pub fn select_transfers(
    mut candidates: Vec<Candidate>,
    in_flight: usize,
    cap: usize,
) -> (Vec<Candidate>, Vec<Candidate>) {
    candidates.sort_by_key(|c| c.priority);
    let budget = cap.saturating_sub(in_flight).min(candidates.len());
    let rejected = candidates.split_off(budget);
    (candidates, rejected)
}

/// Merges every peer's candidates and ships the best ones under the global
/// cap on blocks in flight.
pub struct GlobalSendDispatcher {
    cap: usize,
    limits: SendLimits,
    candidates_per_peer: usize,
}

impl GlobalSendDispatcher {
    pub fn new(cap: usize, limits: SendLimits, candidates_per_peer: usize) -> Self {
        Self {
            cap,
            limits,
            candidates_per_peer,
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Runs each active peer's scheduler. Candidates come back marked
    /// tentatively sending on their peer.
    pub fn collect(
        &self,
        peers: &mut PeerRegistry,
        map: &VoxelMap,
        emerge: &EmergeQueue,
        dtime: f32,
    ) -> Vec<Candidate> {
        let mut out = Vec::new();
        for id in peers.active_ids() {
            let Some(client) = peers.get_mut(id) else {
                continue;
            };
            let Some(view) = client.view else {
                continue;
            };
            let ctx = ScanContext {
                peer: id,
                map,
                emerge,
                limits: &self.limits,
                time_from_building: client.time_from_building,
                max_candidates: self.candidates_per_peer,
            };
            let picked = client
                .scheduler
                .next_candidates(&mut client.blocks, &view, &ctx, dtime);
            out.extend(picked.into_iter().map(|(pos, priority)| Candidate {
                peer: id,
                pos,
                priority,
            }));
        }
        out
    }

    /// Sends the winners and settles every candidate's tentative mark:
    /// confirmed when the bytes left, released otherwise.
    pub fn dispatch<T: Transport>(
        &self,
        peers: &mut PeerRegistry,
        map: &VoxelMap,
        emerge: &EmergeQueue,
        transport: &T,
        dtime: f32,
    ) -> DispatchStats {
        let in_flight = peers.total_sending();
        let candidates = self.collect(peers, map, emerge, dtime);
        let mut stats = DispatchStats {
            collected: candidates.len(),
            ..DispatchStats::default()
        };
        if candidates.is_empty() {
            return stats;
        }
        let (selected, rejected) = select_transfers(candidates, in_flight, self.cap);

        for c in rejected {
            if let Some(client) = peers.get_mut(c.peer) {
                client.blocks.release(c.pos);
            }
            stats.released += 1;
        }

        for c in selected {
            let Some(client) = peers.get_mut(c.peer) else {
                continue;
            };
            let payload = map
                .with_block(c.pos, |b| b.state.is_usable().then(|| b.encode()))
                .flatten();
            let bytes = match payload {
                Some(Ok(payload)) => encode(&Command::BlockData {
                    pos: c.pos,
                    payload,
                }),
                Some(Err(e)) => {
                    log::warn!(target: "net", "block {:?} for {}: {}", c.pos, c.peer, e);
                    client.blocks.release(c.pos);
                    stats.failed += 1;
                    continue;
                }
                // Unloaded between selection and dispatch.
                None => {
                    client.blocks.release(c.pos);
                    stats.released += 1;
                    continue;
                }
            };
            let sent = bytes
                .map_err(|e| e.to_string())
                .and_then(|b| transport.send(c.peer, b).map_err(|e| e.to_string()));
            match sent {
                Ok(()) => {
                    client.blocks.sent_block(c.pos);
                    stats.sent += 1;
                }
                Err(e) => {
                    log::debug!(target: "net", "send {:?} to {}: {}", c.pos, c.peer, e);
                    client.blocks.release(c.pos);
                    stats.failed += 1;
                }
            }
        }
        if stats.sent > 0 {
            log::trace!(
                target: "net",
                "dispatched {} of {} candidates ({} in flight before)",
                stats.sent,
                stats.collected,
                in_flight
            );
        }
        stats
    }
}
