use loam_map::{MapBlock, VoxelMap};
use loam_world::{BLOCK_SIZE, BlockPos, Node, node_index};

use crate::face::Face;
use crate::neighbors::NeighborsLoaded;

/// Copy of a block and its six face neighbors, detached from the map so it
/// can be meshed on another thread.
#[derive(Clone, Debug)]
pub struct MeshInput {
    pub pos: BlockPos,
    pub center: Vec<Node>,
    /// Indexed by `Face::index`; `None` when the neighbor is not usable.
    pub neighbors: [Option<Vec<Node>>; 6],
}

fn usable_nodes(block: &MapBlock) -> Option<Vec<Node>> {
    block.state.is_usable().then(|| block.nodes.clone())
}

impl MeshInput {
    /// Snapshots `pos` and its neighbors. Returns `None` if the block itself
    /// holds no usable data or lies outside the world.
    pub fn gather(map: &VoxelMap, pos: BlockPos) -> Option<MeshInput> {
        if pos.over_limit() {
            return None;
        }
        let center = map.with_block(pos, usable_nodes).flatten()?;
        let neighbors = Face::ALL.map(|face| {
            let (dx, dy, dz) = face.delta();
            map.with_block(pos.offset(dx, dy, dz), usable_nodes).flatten()
        });
        Some(MeshInput {
            pos,
            center,
            neighbors,
        })
    }

    pub fn loaded(&self) -> NeighborsLoaded {
        let mut out = NeighborsLoaded::default();
        for face in Face::ALL {
            out.set(face, self.neighbors[face.index()].is_some());
        }
        out
    }

    /// Node at block-local coordinates that may step one node outside the
    /// block. `None` means the owning neighbor is unknown.
    pub fn node_at(&self, x: i32, y: i32, z: i32) -> Option<Node> {
        let inside = |v: i32| (0..BLOCK_SIZE).contains(&v);
        if inside(x) && inside(y) && inside(z) {
            return self.center.get(node_index(x, y, z)).copied();
        }
        let face = if x < 0 {
            Face::NegX
        } else if x >= BLOCK_SIZE {
            Face::PosX
        } else if y < 0 {
            Face::NegY
        } else if y >= BLOCK_SIZE {
            Face::PosY
        } else if z < 0 {
            Face::NegZ
        } else {
            Face::PosZ
        };
        let nodes = self.neighbors[face.index()].as_ref()?;
        let wrap = |v: i32| v.rem_euclid(BLOCK_SIZE);
        nodes.get(node_index(wrap(x), wrap(y), wrap(z))).copied()
    }
}
