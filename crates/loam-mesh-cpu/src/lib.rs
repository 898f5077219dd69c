//! CPU block mesher: block snapshots in, face-culled geometry out.
#![forbid(unsafe_code)]

mod face;
mod input;
mod mesh_build;
mod neighbors;

pub use face::Face;
pub use input::MeshInput;
pub use mesh_build::MeshBuild;
pub use neighbors::NeighborsLoaded;

use loam_geom::{Aabb, Vec3};
use loam_world::{BLOCK_SIZE, BLOCK_VOLUME, BlockPos, ContentTable};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("block {pos:?} snapshot holds {found} nodes, expected {expected}")]
    BadSnapshot {
        pos: BlockPos,
        expected: usize,
        found: usize,
    },
    #[error("block {0:?} produced more vertices than a u16 index can address")]
    TooManyVertices(BlockPos),
}

/// Geometry for one block in world space.
#[derive(Clone, Debug)]
pub struct BlockMesh {
    pub pos: BlockPos,
    pub bbox: Aabb,
    pub build: MeshBuild,
    pub neighbors: NeighborsLoaded,
}

impl BlockMesh {
    pub fn quad_count(&self) -> usize {
        self.build.quad_count()
    }
}

/// Flat per-content color; the palette is only meant to tell materials apart.
pub fn content_color(id: u16) -> [u8; 4] {
    match id {
        1 => [128, 128, 128, 255],
        2 => [121, 85, 58, 255],
        3 => [86, 152, 60, 255],
        4 => [48, 96, 200, 160],
        other => {
            let h = u32::from(other).wrapping_mul(2_654_435_761);
            [(h >> 24) as u8, (h >> 16) as u8, (h >> 8) as u8, 255]
        }
    }
}

/// Builds the mesh for `input.pos`. A face is emitted where a solid node
/// meets a non-solid one; faces toward an unknown neighbor block are skipped
/// until that neighbor arrives. Returns `Ok(None)` for blocks with no faces.
pub fn build_block_mesh(
    input: &MeshInput,
    content: &ContentTable,
) -> Result<Option<BlockMesh>, MeshError> {
    if input.center.len() != BLOCK_VOLUME {
        return Err(MeshError::BadSnapshot {
            pos: input.pos,
            expected: BLOCK_VOLUME,
            found: input.center.len(),
        });
    }
    let base = input.pos.min_node();
    let base = Vec3::new(base.x as f32, base.y as f32, base.z as f32);
    let mut build = MeshBuild::default();
    for y in 0..BLOCK_SIZE {
        for z in 0..BLOCK_SIZE {
            for x in 0..BLOCK_SIZE {
                let Some(node) = input.node_at(x, y, z) else {
                    continue;
                };
                if !content.is_solid(node.content) {
                    continue;
                }
                for face in Face::ALL {
                    let (dx, dy, dz) = face.delta();
                    let Some(other) = input.node_at(x + dx, y + dy, z + dz) else {
                        continue;
                    };
                    if content.is_solid(other.content) {
                        continue;
                    }
                    if build.vertex_count() + 4 > usize::from(u16::MAX) {
                        return Err(MeshError::TooManyVertices(input.pos));
                    }
                    let min = base + Vec3::new(x as f32, y as f32, z as f32);
                    build.add_node_face(face, min, content_color(node.content));
                }
            }
        }
    }
    if build.is_empty() {
        return Ok(None);
    }
    Ok(Some(BlockMesh {
        pos: input.pos,
        bbox: input.pos.bounds(),
        build,
        neighbors: input.loaded(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use loam_map::{GenState, MapBlock, VoxelMap};
    use loam_world::{Node, NodePos};

    fn air_map_with(nodes: &[NodePos]) -> VoxelMap {
        let map = VoxelMap::new();
        for x in -1..=1 {
            for y in -1..=1 {
                for z in -1..=1 {
                    let pos = BlockPos::new(x, y, z);
                    map.insert(MapBlock::from_nodes(pos, Vec::new(), GenState::Generated));
                }
            }
        }
        for p in nodes {
            map.set_node(*p, Node::new(1)).unwrap();
        }
        map
    }

    #[test]
    fn gather_outside_the_world_is_none() {
        let map = VoxelMap::new();
        let pos = BlockPos::new(i32::MAX, 0, 0);
        map.insert(MapBlock::from_nodes(pos, Vec::new(), GenState::Generated));
        assert!(MeshInput::gather(&map, pos).is_none());
    }

    #[test]
    fn lone_node_has_six_faces() {
        let map = air_map_with(&[NodePos::new(4, 4, 4)]);
        let input = MeshInput::gather(&map, BlockPos::new(0, 0, 0)).unwrap();
        let mesh = build_block_mesh(&input, &ContentTable::builtin())
            .unwrap()
            .unwrap();
        assert_eq!(mesh.quad_count(), 6);
        assert!(mesh.neighbors.is_complete());
    }

    #[test]
    fn adjacent_nodes_share_no_face() {
        let map = air_map_with(&[NodePos::new(4, 4, 4), NodePos::new(5, 4, 4)]);
        let input = MeshInput::gather(&map, BlockPos::new(0, 0, 0)).unwrap();
        let mesh = build_block_mesh(&input, &ContentTable::builtin())
            .unwrap()
            .unwrap();
        assert_eq!(mesh.quad_count(), 10);
    }

    #[test]
    fn all_air_block_has_no_mesh() {
        let map = air_map_with(&[]);
        let input = MeshInput::gather(&map, BlockPos::new(0, 0, 0)).unwrap();
        assert!(
            build_block_mesh(&input, &ContentTable::builtin())
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn face_toward_missing_neighbor_is_skipped() {
        let map = air_map_with(&[NodePos::new(15, 4, 4)]);
        map.remove(BlockPos::new(1, 0, 0));
        let input = MeshInput::gather(&map, BlockPos::new(0, 0, 0)).unwrap();
        assert_eq!(input.loaded().missing().collect::<Vec<_>>(), vec![Face::PosX]);
        let mesh = build_block_mesh(&input, &ContentTable::builtin())
            .unwrap()
            .unwrap();
        assert_eq!(mesh.quad_count(), 5);
    }

    #[test]
    fn truncated_snapshot_is_an_error() {
        let input = MeshInput {
            pos: BlockPos::new(0, 0, 0),
            center: vec![Node::AIR; 10],
            neighbors: Default::default(),
        };
        assert!(matches!(
            build_block_mesh(&input, &ContentTable::builtin()),
            Err(MeshError::BadSnapshot { found: 10, .. })
        ));
    }
}
