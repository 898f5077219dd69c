use std::sync::Arc;

use fastnoise_lite::{FastNoiseLite, NoiseType};
use serde::{Deserialize, Serialize};

use crate::content::{CONTENT_AIR, CONTENT_DIRT, CONTENT_GRASS, CONTENT_STONE, CONTENT_WATER, Node};
use crate::pos::{BLOCK_SIZE, BLOCK_VOLUME, BlockPos, node_index};

/// Produces the full contents of a block that has never existed before.
///
/// Implementations run on emerge worker threads and must be deterministic
/// for a given position.
pub trait BlockGenerator: Send + Sync {
    fn generate(&self, pos: BlockPos) -> Vec<Node>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneratorKind {
    #[default]
    Noise,
    Flat,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorldConfig {
    #[serde(default = "default_seed")]
    pub seed: i32,
    #[serde(default)]
    pub generator: GeneratorKind,
    #[serde(default = "default_ground_level")]
    pub ground_level: i32,
    #[serde(default = "default_water_level")]
    pub water_level: i32,
    #[serde(default = "default_height_frequency")]
    pub height_frequency: f32,
    #[serde(default = "default_height_amplitude")]
    pub height_amplitude: f32,
}

fn default_seed() -> i32 {
    1337
}
fn default_ground_level() -> i32 {
    8
}
fn default_water_level() -> i32 {
    1
}
fn default_height_frequency() -> f32 {
    0.01
}
fn default_height_amplitude() -> f32 {
    12.0
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            generator: GeneratorKind::default(),
            ground_level: default_ground_level(),
            water_level: default_water_level(),
            height_frequency: default_height_frequency(),
            height_amplitude: default_height_amplitude(),
        }
    }
}

impl WorldConfig {
    pub fn build_generator(&self) -> Arc<dyn BlockGenerator> {
        match self.generator {
            GeneratorKind::Noise => Arc::new(NoiseGenerator::new(self)),
            GeneratorKind::Flat => Arc::new(FlatGenerator::new(self.ground_level)),
        }
    }
}

/// Column fill shared by both generators: stone, two dirt, a grass cap, then
/// water up to the water level.
fn fill_columns(pos: BlockPos, water_level: i32, height_at: impl Fn(i32, i32) -> i32) -> Vec<Node> {
    let mut nodes = vec![Node::AIR; BLOCK_VOLUME];
    let base = pos.min_node();
    for z in 0..BLOCK_SIZE {
        for x in 0..BLOCK_SIZE {
            let h = height_at(base.x + x, base.z + z);
            for y in 0..BLOCK_SIZE {
                let wy = base.y + y;
                let content = if wy < h - 3 {
                    CONTENT_STONE
                } else if wy < h - 1 {
                    CONTENT_DIRT
                } else if wy == h - 1 {
                    if wy < water_level { CONTENT_DIRT } else { CONTENT_GRASS }
                } else if wy < water_level {
                    CONTENT_WATER
                } else {
                    CONTENT_AIR
                };
                nodes[node_index(x, y, z)] = Node::new(content);
            }
        }
    }
    nodes
}

pub struct NoiseGenerator {
    terrain: FastNoiseLite,
    ground_level: i32,
    water_level: i32,
    amplitude: f32,
}

impl NoiseGenerator {
    pub fn new(cfg: &WorldConfig) -> Self {
        let mut terrain = FastNoiseLite::with_seed(cfg.seed);
        terrain.set_noise_type(Some(NoiseType::OpenSimplex2));
        terrain.set_frequency(Some(cfg.height_frequency));
        Self {
            terrain,
            ground_level: cfg.ground_level,
            water_level: cfg.water_level,
            amplitude: cfg.height_amplitude,
        }
    }

    pub fn surface_height(&self, wx: i32, wz: i32) -> i32 {
        let n = self.terrain.get_noise_2d(wx as f32, wz as f32);
        self.ground_level + (n * self.amplitude).round() as i32
    }
}

impl BlockGenerator for NoiseGenerator {
    fn generate(&self, pos: BlockPos) -> Vec<Node> {
        fill_columns(pos, self.water_level, |x, z| self.surface_height(x, z))
    }
}

pub struct FlatGenerator {
    ground_level: i32,
}

impl FlatGenerator {
    pub fn new(ground_level: i32) -> Self {
        Self { ground_level }
    }
}

impl BlockGenerator for FlatGenerator {
    fn generate(&self, pos: BlockPos) -> Vec<Node> {
        fill_columns(pos, i32::MIN, |_, _| self.ground_level)
    }
}
