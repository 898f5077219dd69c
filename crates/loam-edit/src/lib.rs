//! World mutation events and their per-step fan-out to connected peers.
#![forbid(unsafe_code)]

use std::collections::VecDeque;

use loam_geom::Vec3;
use loam_net::{Command, PeerId};
use loam_world::{BlockPos, Node, NodePos};

/// Radius in nodes within which peers get node edits directly.
pub const DEFAULT_NOTIFY_RADIUS: f32 = 30.0;
/// Radius used while many edits are queued, to keep a burst cheap.
pub const DEFAULT_BUSY_NOTIFY_RADIUS: f32 = 5.0;
/// Pending edit count at which the busy radius applies.
pub const BUSY_THRESHOLD: usize = 4;

#[derive(Clone, Debug, PartialEq)]
pub enum MapEdit {
    SetNode { pos: NodePos, node: Node },
    RemoveNode { pos: NodePos },
    BlockRegenerated(BlockPos),
    Bulk(Vec<BlockPos>),
}

impl MapEdit {
    /// Blocks whose sent-state becomes stale because of this edit.
    pub fn modified_blocks(&self) -> Vec<BlockPos> {
        match self {
            MapEdit::SetNode { pos, .. } | MapEdit::RemoveNode { pos } => vec![pos.block()],
            MapEdit::BlockRegenerated(b) => vec![*b],
            MapEdit::Bulk(blocks) => blocks.clone(),
        }
    }

    fn direct_command(&self) -> Option<(NodePos, Command)> {
        match self {
            MapEdit::SetNode { pos, node } => Some((
                *pos,
                Command::AddNode {
                    pos: *pos,
                    node: *node,
                },
            )),
            MapEdit::RemoveNode { pos } => Some((*pos, Command::RemoveNode { pos: *pos })),
            MapEdit::BlockRegenerated(_) | MapEdit::Bulk(_) => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EditEvent {
    pub edit: MapEdit,
    /// Peer that caused the edit and already shows it.
    pub origin: Option<PeerId>,
}

/// What the flush decided for a peer.
#[derive(Clone, Debug, PartialEq)]
pub enum EditAction {
    Notify { peer: PeerId, command: Command },
    Invalidate { peer: PeerId, blocks: Vec<BlockPos> },
}

/// Position of a peer as seen by the flush. `None` means not known yet.
#[derive(Clone, Copy, Debug)]
pub struct PeerSnapshot {
    pub id: PeerId,
    pub position: Option<Vec3>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub edits: usize,
    pub notified: usize,
    pub invalidated: usize,
}

pub struct EditEventBus {
    pending: VecDeque<EditEvent>,
    radius: f32,
    busy_radius: f32,
    last: FlushStats,
}

impl Default for EditEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_NOTIFY_RADIUS, DEFAULT_BUSY_NOTIFY_RADIUS)
    }
}

impl EditEventBus {
    pub fn new(radius: f32, busy_radius: f32) -> Self {
        Self {
            pending: VecDeque::new(),
            radius,
            busy_radius,
            last: FlushStats::default(),
        }
    }

    pub fn on_edit(&mut self, edit: MapEdit, origin: Option<PeerId>) {
        self.pending.push_back(EditEvent { edit, origin });
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn last_stats(&self) -> FlushStats {
        self.last
    }

    /// Drains every pending edit. Each edit either reaches a peer as a direct
    /// packet or clears that peer's sent-state for the modified blocks.
    pub fn flush(&mut self, peers: &[PeerSnapshot]) -> Vec<EditAction> {
        let radius = if self.pending.len() >= BUSY_THRESHOLD {
            self.busy_radius
        } else {
            self.radius
        };
        let mut stats = FlushStats::default();
        let mut out = Vec::new();
        while let Some(event) = self.pending.pop_front() {
            stats.edits += 1;
            let modified = event.edit.modified_blocks();
            match event.edit.direct_command() {
                Some((node, command)) => {
                    let center = node.center();
                    for peer in peers {
                        if Some(peer.id) == event.origin {
                            continue;
                        }
                        let near = peer
                            .position
                            .is_some_and(|p| p.distance(center) <= radius);
                        if near {
                            stats.notified += 1;
                            out.push(EditAction::Notify {
                                peer: peer.id,
                                command: command.clone(),
                            });
                        } else {
                            stats.invalidated += 1;
                            out.push(EditAction::Invalidate {
                                peer: peer.id,
                                blocks: modified.clone(),
                            });
                        }
                    }
                }
                None => {
                    for peer in peers {
                        stats.invalidated += 1;
                        out.push(EditAction::Invalidate {
                            peer: peer.id,
                            blocks: modified.clone(),
                        });
                    }
                }
            }
        }
        if stats.edits > 0 {
            log::debug!(
                target: "edits",
                "flushed {} edits (radius {:.0}): {} direct, {} invalidations",
                stats.edits,
                radius,
                stats.notified,
                stats.invalidated
            );
        }
        self.last = stats;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: u32, at: Option<Vec3>) -> PeerSnapshot {
        PeerSnapshot {
            id: PeerId(id),
            position: at,
        }
    }

    #[test]
    fn near_peer_gets_direct_far_peer_gets_invalidation() {
        let mut bus = EditEventBus::default();
        bus.on_edit(
            MapEdit::RemoveNode {
                pos: NodePos::new(5, 5, 5),
            },
            None,
        );
        let peers = [
            peer(1, Some(Vec3::new(10.0, 5.0, 5.0))),
            peer(2, Some(Vec3::new(500.0, 5.0, 5.0))),
            peer(3, None),
        ];
        let actions = bus.flush(&peers);
        assert_eq!(actions.len(), 3);
        assert_eq!(
            actions[0],
            EditAction::Notify {
                peer: PeerId(1),
                command: Command::RemoveNode {
                    pos: NodePos::new(5, 5, 5)
                }
            }
        );
        for (a, id) in actions[1..].iter().zip([2, 3]) {
            assert_eq!(
                *a,
                EditAction::Invalidate {
                    peer: PeerId(id),
                    blocks: vec![BlockPos::new(0, 0, 0)]
                }
            );
        }
        assert_eq!(bus.pending_len(), 0);
    }

    #[test]
    fn busy_queue_shrinks_radius() {
        let mut bus = EditEventBus::default();
        for x in 0..BUSY_THRESHOLD as i32 {
            bus.on_edit(
                MapEdit::SetNode {
                    pos: NodePos::new(x, 0, 0),
                    node: Node::new(1),
                },
                None,
            );
        }
        // 20 nodes away: inside the normal radius, outside the busy one.
        let actions = bus.flush(&[peer(1, Some(Vec3::new(20.0, 0.5, 0.5)))]);
        assert!(
            actions
                .iter()
                .all(|a| matches!(a, EditAction::Invalidate { .. }))
        );
        assert_eq!(bus.last_stats().invalidated, BUSY_THRESHOLD);
    }

    #[test]
    fn origin_is_skipped_for_node_edits() {
        let mut bus = EditEventBus::default();
        bus.on_edit(
            MapEdit::SetNode {
                pos: NodePos::new(0, 0, 0),
                node: Node::new(2),
            },
            Some(PeerId(7)),
        );
        let actions = bus.flush(&[peer(7, Some(Vec3::ZERO))]);
        assert!(actions.is_empty());
    }

    #[test]
    fn regeneration_invalidates_everyone() {
        let mut bus = EditEventBus::default();
        bus.on_edit(MapEdit::BlockRegenerated(BlockPos::new(1, 1, 1)), Some(PeerId(1)));
        let actions = bus.flush(&[peer(1, Some(Vec3::ZERO)), peer(2, None)]);
        assert_eq!(actions.len(), 2);
        assert!(actions.iter().all(|a| matches!(
            a,
            EditAction::Invalidate { blocks, .. } if blocks == &vec![BlockPos::new(1, 1, 1)]
        )));
    }
}
