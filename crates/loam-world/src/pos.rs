use loam_geom::{Aabb, Vec3};
use serde::{Deserialize, Serialize};

/// Nodes per block edge.
pub const BLOCK_SIZE: i32 = 16;
pub const BLOCK_VOLUME: usize = (BLOCK_SIZE * BLOCK_SIZE * BLOCK_SIZE) as usize;
/// Absolute node coordinate beyond which nothing is generated or sent.
pub const MAX_MAP_GENERATION_LIMIT: i32 = 31_000;

const MAX_LIMIT_BP: i32 = MAX_MAP_GENERATION_LIMIT / BLOCK_SIZE;

/// Flat index of a node inside a block, `x` fastest then `z` then `y`.
#[inline]
pub fn node_index(x: i32, y: i32, z: i32) -> usize {
    debug_assert!((0..BLOCK_SIZE).contains(&x));
    debug_assert!((0..BLOCK_SIZE).contains(&y));
    debug_assert!((0..BLOCK_SIZE).contains(&z));
    ((y * BLOCK_SIZE + z) * BLOCK_SIZE + x) as usize
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    #[inline]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    #[inline]
    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            z: self.z + dz,
        }
    }

    #[inline]
    pub fn distance_sq(self, other: BlockPos) -> i64 {
        let dx = i64::from(self.x - other.x);
        let dy = i64::from(self.y - other.y);
        let dz = i64::from(self.z - other.z);
        dx * dx + dy * dy + dz * dz
    }

    /// Chebyshev distance, the shell radius `other` sits on around `self`.
    #[inline]
    pub fn shell_distance(self, other: BlockPos) -> i32 {
        (self.x - other.x)
            .abs()
            .max((self.y - other.y).abs())
            .max((self.z - other.z).abs())
    }

    #[inline]
    pub fn over_limit(self) -> bool {
        self.x < -MAX_LIMIT_BP
            || self.x > MAX_LIMIT_BP
            || self.y < -MAX_LIMIT_BP
            || self.y > MAX_LIMIT_BP
            || self.z < -MAX_LIMIT_BP
            || self.z > MAX_LIMIT_BP
    }

    /// The six face-adjacent blocks in `-X, +X, -Y, +Y, -Z, +Z` order.
    pub fn face_neighbors(self) -> [BlockPos; 6] {
        [
            self.offset(-1, 0, 0),
            self.offset(1, 0, 0),
            self.offset(0, -1, 0),
            self.offset(0, 1, 0),
            self.offset(0, 0, -1),
            self.offset(0, 0, 1),
        ]
    }

    #[inline]
    pub fn min_node(self) -> NodePos {
        NodePos::new(self.x * BLOCK_SIZE, self.y * BLOCK_SIZE, self.z * BLOCK_SIZE)
    }

    pub fn bounds(self) -> Aabb {
        let s = BLOCK_SIZE as f32;
        let min = Vec3::new(self.x as f32 * s, self.y as f32 * s, self.z as f32 * s);
        Aabb::new(min, min + Vec3::splat(s))
    }

    #[inline]
    pub fn center(self) -> Vec3 {
        self.bounds().center()
    }

    /// Block containing a point given in node units.
    pub fn containing(p: Vec3) -> BlockPos {
        NodePos::containing(p).block()
    }
}

impl From<(i32, i32, i32)> for BlockPos {
    fn from(value: (i32, i32, i32)) -> Self {
        Self::new(value.0, value.1, value.2)
    }
}

impl From<BlockPos> for (i32, i32, i32) {
    fn from(value: BlockPos) -> Self {
        (value.x, value.y, value.z)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodePos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl NodePos {
    #[inline]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    #[inline]
    pub fn block(self) -> BlockPos {
        BlockPos::new(
            self.x.div_euclid(BLOCK_SIZE),
            self.y.div_euclid(BLOCK_SIZE),
            self.z.div_euclid(BLOCK_SIZE),
        )
    }

    /// Coordinates relative to the owning block's minimum corner.
    #[inline]
    pub fn local(self) -> (i32, i32, i32) {
        (
            self.x.rem_euclid(BLOCK_SIZE),
            self.y.rem_euclid(BLOCK_SIZE),
            self.z.rem_euclid(BLOCK_SIZE),
        )
    }

    #[inline]
    pub fn local_index(self) -> usize {
        let (x, y, z) = self.local();
        node_index(x, y, z)
    }

    /// Whether the owning block lies outside the world.
    #[inline]
    pub fn over_limit(self) -> bool {
        self.block().over_limit()
    }

    pub fn containing(p: Vec3) -> NodePos {
        NodePos::new(p.x.floor() as i32, p.y.floor() as i32, p.z.floor() as i32)
    }

    /// Node center in world units.
    #[inline]
    pub fn center(self) -> Vec3 {
        Vec3::new(
            self.x as f32 + 0.5,
            self.y as f32 + 0.5,
            self.z as f32 + 0.5,
        )
    }
}

impl From<(i32, i32, i32)> for NodePos {
    fn from(value: (i32, i32, i32)) -> Self {
        Self::new(value.0, value.1, value.2)
    }
}

/// Blocks whose geometry depends on the node at `p`: the owning block first,
/// then each neighbor the node touches across a block edge.
pub fn affected_blocks(p: NodePos) -> Vec<BlockPos> {
    let owner = p.block();
    let (lx, ly, lz) = p.local();
    let mut out = vec![owner];
    let edge = |l: i32| -> i32 {
        if l == 0 {
            -1
        } else if l == BLOCK_SIZE - 1 {
            1
        } else {
            0
        }
    };
    let (ex, ey, ez) = (edge(lx), edge(ly), edge(lz));
    if ex != 0 {
        out.push(owner.offset(ex, 0, 0));
    }
    if ey != 0 {
        out.push(owner.offset(0, ey, 0));
    }
    if ez != 0 {
        out.push(owner.offset(0, 0, ez));
    }
    out
}
