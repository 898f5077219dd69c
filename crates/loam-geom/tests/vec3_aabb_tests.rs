use loam_geom::{Aabb, Vec3};

fn approx_eq(a: f32, b: f32, eps: f32) -> bool {
    (a - b).abs() <= eps
}

fn vec3_approx_eq(a: Vec3, b: Vec3, eps: f32) -> bool {
    approx_eq(a.x, b.x, eps) && approx_eq(a.y, b.y, eps) && approx_eq(a.z, b.z, eps)
}

#[test]
fn vec3_add_sub_neg() {
    let a = Vec3::new(1.0, 2.0, 3.0);
    let b = Vec3::new(-4.0, 5.0, -6.0);
    let c = a + b;
    assert!(vec3_approx_eq(c, Vec3::new(-3.0, 7.0, -3.0), 1e-6));
    assert!(vec3_approx_eq(c - a, b, 1e-6));
    assert!(vec3_approx_eq(-a + a, Vec3::ZERO, 1e-6));
}

#[test]
fn vec3_normalized_zero_is_unchanged() {
    let v = Vec3::new(3.0, 4.0, 0.0);
    assert!(approx_eq(v.length(), 5.0, 1e-6));
    assert!(vec3_approx_eq(v.normalized(), Vec3::new(0.6, 0.8, 0.0), 1e-6));
    assert!(vec3_approx_eq(Vec3::ZERO.normalized(), Vec3::ZERO, 1e-6));
}

#[test]
fn pitch_down_points_below_horizon() {
    // Positive pitch looks down.
    let d = Vec3::look_dir(0.5, 0.0);
    assert!(d.y < 0.0);
    assert!(d.z > 0.0);
    assert!(approx_eq(d.length(), 1.0, 1e-6));
}

#[test]
fn aabb_center_radius_contains() {
    let aabb = Aabb::new(Vec3::ZERO, Vec3::splat(16.0));
    assert!(vec3_approx_eq(aabb.center(), Vec3::splat(8.0), 1e-6));
    assert!(approx_eq(aabb.bounding_radius(), 8.0 * 3f32.sqrt(), 1e-4));
    assert!(aabb.contains(Vec3::new(0.0, 16.0, 3.5)));
    assert!(!aabb.contains(Vec3::new(-0.1, 1.0, 1.0)));
}
