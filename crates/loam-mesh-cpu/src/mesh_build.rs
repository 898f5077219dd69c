use loam_geom::Vec3;

use crate::face::Face;

/// Indexed triangle list with per-vertex normals and colors.
#[derive(Default, Clone, Debug)]
pub struct MeshBuild {
    pub pos: Vec<f32>,
    pub norm: Vec<f32>,
    pub col: Vec<u8>,
    pub idx: Vec<u16>,
}

impl MeshBuild {
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.pos.len() / 3
    }

    #[inline]
    pub fn quad_count(&self) -> usize {
        self.idx.len() / 6
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.idx.is_empty()
    }

    fn push_vertex(&mut self, p: Vec3, n: Vec3, rgba: [u8; 4]) {
        self.pos.extend_from_slice(&[p.x, p.y, p.z]);
        self.norm.extend_from_slice(&[n.x, n.y, n.z]);
        self.col.extend_from_slice(&rgba);
    }

    /// Emits the unit face of the node whose minimum corner is `node_min`,
    /// wound counter-clockwise when seen from outside.
    pub fn add_node_face(&mut self, face: Face, node_min: Vec3, rgba: [u8; 4]) {
        let n = face.normal();
        let origin = if face.is_positive() { node_min + n } else { node_min };
        let (mut u, mut v) = face.tangents();
        if u.cross(v).dot(n) < 0.0 {
            std::mem::swap(&mut u, &mut v);
        }
        let base = self.vertex_count() as u16;
        for corner in [origin, origin + u, origin + u + v, origin + v] {
            self.push_vertex(corner, n, rgba);
        }
        self.idx
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
}
