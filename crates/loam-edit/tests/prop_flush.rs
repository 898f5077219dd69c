use loam_edit::{EditAction, EditEventBus, MapEdit, PeerSnapshot};
use loam_geom::Vec3;
use loam_net::PeerId;
use loam_world::{Node, NodePos};
use proptest::prelude::*;

fn arb_edit() -> impl Strategy<Value = MapEdit> {
    ((-64i32..64, -64i32..64, -64i32..64), any::<bool>()).prop_map(|((x, y, z), set)| {
        let pos = NodePos::new(x, y, z);
        if set {
            MapEdit::SetNode {
                pos,
                node: Node::new(1),
            }
        } else {
            MapEdit::RemoveNode { pos }
        }
    })
}

fn arb_peer_pos() -> impl Strategy<Value = Option<Vec3>> {
    prop::option::of((-100.0f32..100.0, -100.0f32..100.0, -100.0f32..100.0))
        .prop_map(|p| p.map(|(x, y, z)| Vec3::new(x, y, z)))
}

proptest! {
    // Every node edit yields exactly one action per peer: a direct packet
    // or an invalidation of the owning block
    #[test]
    fn every_edit_reaches_every_peer_once(
        edits in prop::collection::vec(arb_edit(), 1..12),
        positions in prop::collection::vec(arb_peer_pos(), 1..6),
    ) {
        let peers: Vec<PeerSnapshot> = positions
            .iter()
            .enumerate()
            .map(|(i, p)| PeerSnapshot { id: PeerId(i as u32 + 1), position: *p })
            .collect();
        let mut bus = EditEventBus::default();
        for e in &edits {
            bus.on_edit(e.clone(), None);
        }
        let actions = bus.flush(&peers);
        prop_assert_eq!(actions.len(), edits.len() * peers.len());
        for (i, chunk) in actions.chunks(peers.len()).enumerate() {
            let owner = edits[i].modified_blocks();
            for (action, peer) in chunk.iter().zip(&peers) {
                match action {
                    EditAction::Notify { peer: id, .. } => {
                        prop_assert_eq!(*id, peer.id);
                        prop_assert!(peer.position.is_some());
                    }
                    EditAction::Invalidate { peer: id, blocks } => {
                        prop_assert_eq!(*id, peer.id);
                        prop_assert_eq!(blocks, &owner);
                    }
                }
            }
        }
    }
}
