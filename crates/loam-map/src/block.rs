use loam_world::{BLOCK_VOLUME, BlockPos, Node, NodePos, node_index};
use serde::{Deserialize, Serialize};

use crate::error::MapError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GenState {
    /// Looked up in the store and not found; the block is a placeholder.
    Unloaded,
    LoadedFromStore,
    Generated,
    /// Contents are known to be wrong and must be emerged again.
    Invalid,
}

impl GenState {
    /// Whether the block holds real data that can be sent or meshed.
    #[inline]
    pub fn is_usable(self) -> bool {
        matches!(self, GenState::LoadedFromStore | GenState::Generated)
    }
}

#[derive(Clone, Debug)]
pub struct MapBlock {
    pub pos: BlockPos,
    pub nodes: Vec<Node>,
    pub state: GenState,
    pub day_night_differs: bool,
    pub last_touched: u64,
    /// Changed since it was last written to the store.
    pub modified: bool,
}

impl MapBlock {
    pub fn from_nodes(pos: BlockPos, nodes: Vec<Node>, state: GenState) -> Self {
        let mut nodes = nodes;
        if nodes.len() != BLOCK_VOLUME {
            nodes.resize(BLOCK_VOLUME, Node::AIR);
        }
        let mut block = MapBlock {
            pos,
            nodes,
            state,
            day_night_differs: false,
            last_touched: 0,
            modified: false,
        };
        block.recompute_day_night();
        block
    }

    /// Placeholder for a position known to be absent from the store.
    pub fn dummy(pos: BlockPos) -> Self {
        MapBlock {
            pos,
            nodes: Vec::new(),
            state: GenState::Unloaded,
            day_night_differs: false,
            last_touched: 0,
            modified: false,
        }
    }

    #[inline]
    pub fn is_dummy(&self) -> bool {
        self.state == GenState::Unloaded
    }

    #[inline]
    pub fn get_local(&self, x: i32, y: i32, z: i32) -> Node {
        self.nodes
            .get(node_index(x, y, z))
            .copied()
            .unwrap_or(Node::AIR)
    }

    pub fn get(&self, p: NodePos) -> Option<Node> {
        if p.block() != self.pos {
            return None;
        }
        self.nodes.get(p.local_index()).copied()
    }

    /// Writes a node; generation state is left untouched.
    pub fn set(&mut self, p: NodePos, node: Node) -> Result<(), MapError> {
        if p.block() != self.pos || !self.state.is_usable() {
            return Err(MapError::NotLoaded(p.block()));
        }
        let i = p.local_index();
        self.nodes[i] = node;
        self.modified = true;
        self.recompute_day_night();
        Ok(())
    }

    /// Approximates lighting variance: a block mixing air and solid matter is
    /// assumed to be near a surface and look different by day and night.
    pub fn recompute_day_night(&mut self) {
        let has_air = self.nodes.iter().any(|n| n.is_air());
        let has_matter = self.nodes.iter().any(|n| !n.is_air());
        self.day_night_differs = has_air && has_matter;
    }

    pub fn is_all_air(&self) -> bool {
        self.nodes.iter().all(|n| n.is_air())
    }

    pub fn payload(&self) -> BlockPayload {
        BlockPayload {
            nodes: self.nodes.clone(),
            day_night_differs: self.day_night_differs,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, MapError> {
        self.payload().encode()
    }
}

/// Serialized block contents, shared by the wire format and the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockPayload {
    pub nodes: Vec<Node>,
    pub day_night_differs: bool,
}

impl BlockPayload {
    pub fn encode(&self) -> Result<Vec<u8>, MapError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MapError> {
        let payload: BlockPayload = bincode::deserialize(bytes)?;
        if payload.nodes.len() != BLOCK_VOLUME {
            return Err(MapError::PayloadSize {
                expected: BLOCK_VOLUME,
                found: payload.nodes.len(),
            });
        }
        Ok(payload)
    }

    pub fn into_block(self, pos: BlockPos, state: GenState) -> MapBlock {
        let mut block = MapBlock::from_nodes(pos, self.nodes, state);
        block.day_night_differs = self.day_night_differs;
        block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dummy_is_not_usable() {
        let b = MapBlock::dummy(BlockPos::new(1, 2, 3));
        assert!(b.is_dummy());
        assert!(!b.state.is_usable());
    }

    #[test]
    fn set_node_keeps_generation_state() {
        let mut b = MapBlock::from_nodes(BlockPos::new(0, 0, 0), Vec::new(), GenState::Generated);
        assert!(!b.day_night_differs);
        b.set(NodePos::new(1, 1, 1), Node::new(1)).unwrap();
        assert_eq!(b.state, GenState::Generated);
        assert!(b.modified);
        assert!(b.day_night_differs);
        assert_eq!(b.get(NodePos::new(1, 1, 1)), Some(Node::new(1)));
    }

    #[test]
    fn set_node_outside_block_is_rejected() {
        let mut b = MapBlock::from_nodes(BlockPos::new(0, 0, 0), Vec::new(), GenState::Generated);
        assert!(b.set(NodePos::new(16, 0, 0), Node::new(1)).is_err());
    }

    #[test]
    fn short_payload_is_rejected() {
        let bytes = BlockPayload {
            nodes: vec![Node::AIR; 3],
            day_night_differs: false,
        }
        .encode()
        .unwrap();
        assert!(matches!(
            BlockPayload::decode(&bytes),
            Err(MapError::PayloadSize { found: 3, .. })
        ));
    }
}
