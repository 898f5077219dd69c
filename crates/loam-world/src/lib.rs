//! World coordinates, node content and block generators.
#![forbid(unsafe_code)]

pub mod content;
pub mod generator;
pub mod pos;

pub use content::{CONTENT_AIR, ContentDef, ContentTable, Node};
pub use generator::{BlockGenerator, FlatGenerator, GeneratorKind, NoiseGenerator, WorldConfig};
pub use pos::{
    BLOCK_SIZE, BLOCK_VOLUME, BlockPos, MAX_MAP_GENERATION_LIMIT, NodePos, affected_blocks,
    node_index,
};
