use loam_geom::Vec3;

/// One of the six axis-aligned faces of a node or block. Indices follow
/// `BlockPos::face_neighbors`: `-X, +X, -Y, +Y, -Z, +Z`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Face {
    NegX = 0,
    PosX = 1,
    NegY = 2,
    PosY = 3,
    NegZ = 4,
    PosZ = 5,
}

impl Face {
    pub const ALL: [Face; 6] = [
        Face::NegX,
        Face::PosX,
        Face::NegY,
        Face::PosY,
        Face::NegZ,
        Face::PosZ,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// 0 for X, 1 for Y, 2 for Z.
    #[inline]
    pub fn axis(self) -> usize {
        self.index() / 2
    }

    #[inline]
    pub fn is_positive(self) -> bool {
        self.index() % 2 == 1
    }

    /// Grid step out of this face.
    #[inline]
    pub fn delta(self) -> (i32, i32, i32) {
        let s = if self.is_positive() { 1 } else { -1 };
        match self.axis() {
            0 => (s, 0, 0),
            1 => (0, s, 0),
            _ => (0, 0, s),
        }
    }

    #[inline]
    pub fn normal(self) -> Vec3 {
        let (dx, dy, dz) = self.delta();
        Vec3::new(dx as f32, dy as f32, dz as f32)
    }

    /// Two unit edges spanning the face plane.
    pub fn tangents(self) -> (Vec3, Vec3) {
        match self.axis() {
            0 => (Vec3::new(0.0, 0.0, 1.0), Vec3::UP),
            1 => (Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 0.0, 1.0)),
            _ => (Vec3::new(1.0, 0.0, 0.0), Vec3::UP),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loam_world::BlockPos;

    #[test]
    fn order_matches_block_neighbors() {
        let origin = BlockPos::new(0, 0, 0);
        for (face, n) in Face::ALL.iter().zip(origin.face_neighbors()) {
            let (dx, dy, dz) = face.delta();
            assert_eq!(origin.offset(dx, dy, dz), n);
        }
    }

    #[test]
    fn tangents_are_perpendicular_to_the_normal() {
        for face in Face::ALL {
            let (u, v) = face.tangents();
            assert_eq!(u.dot(face.normal()), 0.0);
            assert_eq!(v.dot(face.normal()), 0.0);
            assert!(u.cross(v).length() > 0.5);
        }
    }
}
