use std::f32::consts::PI;

use loam_geom::Vec3;
use loam_world::{BLOCK_SIZE, BlockPos};

/// Half the diagonal of a block.
pub const BLOCK_MAX_RADIUS: f32 = 0.5 * BLOCK_SIZE as f32 * 1.732_050_8;

/// Horizontal field of view assumed when a client reports none.
pub const DEFAULT_FOV: f32 = 72.0 * PI / 180.0 * 4.0 / 3.0;

/// Whether any part of the block can be inside a cone of `fov` radians
/// around `camera_dir`, no further than `range` nodes from `camera_pos`.
///
/// The camera is pushed back along its direction so that the cone test is
/// conservative for a block the size of `BLOCK_MAX_RADIUS`.
pub fn block_in_sight(
    pos: BlockPos,
    camera_pos: Vec3,
    camera_dir: Vec3,
    fov: f32,
    range: f32,
) -> bool {
    let center = pos.center();
    let rel = center - camera_pos;
    let d = (rel.length() - BLOCK_MAX_RADIUS).max(0.0);
    if d > range {
        return false;
    }
    if d == 0.0 {
        return true;
    }

    let adjdist = BLOCK_MAX_RADIUS / ((PI - fov) / 2.0).cos();
    let adjusted = center - (camera_pos - camera_dir * adjdist);
    let len = adjusted.length();
    if len == 0.0 {
        return true;
    }
    let cosangle = adjusted.dot(camera_dir) / len;
    cosangle >= (fov / 2.0 + 0.1).min(PI).cos()
}

/// Positions on the surface of the cube of Chebyshev radius `d` around
/// `center`, nearest to the center first.
pub fn shell(center: BlockPos, d: i32) -> Vec<BlockPos> {
    if d <= 0 {
        return vec![center];
    }
    let mut out = Vec::with_capacity((24 * d * d + 2) as usize);
    for dy in -d..=d {
        for dz in -d..=d {
            let on_face = dy.abs() == d || dz.abs() == d;
            if on_face {
                for dx in -d..=d {
                    out.push(center.offset(dx, dy, dz));
                }
            } else {
                out.push(center.offset(-d, dy, dz));
                out.push(center.offset(d, dy, dz));
            }
        }
    }
    out.sort_by_key(|p| (p.distance_sq(center), *p));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_sizes() {
        let c = BlockPos::new(3, -2, 7);
        assert_eq!(shell(c, 0), vec![c]);
        assert_eq!(shell(c, 1).len(), 26);
        assert_eq!(shell(c, 2).len(), 98);
        assert!(shell(c, 2).iter().all(|p| p.shell_distance(c) == 2));
    }

    #[test]
    fn shell_starts_with_face_centers() {
        let c = BlockPos::new(0, 0, 0);
        let s = shell(c, 3);
        assert_eq!(s[0].distance_sq(c), 9);
        assert_eq!(s[5].distance_sq(c), 9);
        assert!(s[6].distance_sq(c) > 9);
    }

    #[test]
    fn block_containing_camera_is_visible() {
        let pos = BlockPos::new(0, 0, 0);
        let eye = Vec3::new(8.0, 8.0, 8.0);
        assert!(block_in_sight(pos, eye, Vec3::FORWARD, 0.5, 10.0));
    }

    #[test]
    fn block_behind_camera_is_not_visible() {
        let eye = Vec3::new(8.0, 8.0, 8.0);
        let ahead = BlockPos::new(0, 0, 4);
        let behind = BlockPos::new(0, 0, -4);
        assert!(block_in_sight(ahead, eye, Vec3::FORWARD, DEFAULT_FOV, 200.0));
        assert!(!block_in_sight(behind, eye, Vec3::FORWARD, DEFAULT_FOV, 200.0));
    }

    #[test]
    fn range_is_measured_to_the_block_surface() {
        let eye = Vec3::new(8.0, 8.0, 8.0);
        let far = BlockPos::new(0, 0, 4);
        // 64 nodes to the center, minus the block radius.
        assert!(!block_in_sight(far, eye, Vec3::FORWARD, DEFAULT_FOV, 40.0));
        assert!(block_in_sight(far, eye, Vec3::FORWARD, DEFAULT_FOV, 60.0));
    }
}
