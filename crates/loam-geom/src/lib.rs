//! Minimal geometry types shared by the server and client crates.
#![forbid(unsafe_code)]

use core::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };
    pub const UP: Vec3 = Vec3 {
        x: 0.0,
        y: 1.0,
        z: 0.0,
    };
    /// Camera forward at zero pitch and yaw.
    pub const FORWARD: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 1.0,
    };

    #[inline]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    #[inline]
    pub const fn splat(v: f32) -> Self {
        Self { x: v, y: v, z: v }
    }

    #[inline]
    pub fn dot(self, o: Vec3) -> f32 {
        self.x * o.x + self.y * o.y + self.z * o.z
    }

    #[inline]
    pub fn cross(self, o: Vec3) -> Vec3 {
        Vec3::new(
            self.y * o.z - self.z * o.y,
            self.z * o.x - self.x * o.z,
            self.x * o.y - self.y * o.x,
        )
    }

    #[inline]
    pub fn length_sq(self) -> f32 {
        self.dot(self)
    }

    #[inline]
    pub fn length(self) -> f32 {
        self.length_sq().sqrt()
    }

    #[inline]
    pub fn distance(self, other: Vec3) -> f32 {
        (self - other).length()
    }

    #[inline]
    pub fn normalized(self) -> Vec3 {
        match self.length() {
            l if l > 0.0 => self / l,
            _ => self,
        }
    }

    #[inline]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Rotates around the X axis (pitch). Positive angles tilt +Z towards -Y.
    #[inline]
    pub fn rotate_yz_by(self, radians: f32) -> Vec3 {
        let (sn, cs) = radians.sin_cos();
        Vec3::new(self.x, self.y * cs - self.z * sn, self.y * sn + self.z * cs)
    }

    /// Rotates around the Y axis (yaw).
    #[inline]
    pub fn rotate_xz_by(self, radians: f32) -> Vec3 {
        let (sn, cs) = radians.sin_cos();
        Vec3::new(self.x * cs - self.z * sn, self.y, self.x * sn + self.z * cs)
    }

    /// Unit view direction for a camera with the given pitch and yaw in radians.
    #[inline]
    pub fn look_dir(pitch: f32, yaw: f32) -> Vec3 {
        Vec3::FORWARD.rotate_yz_by(pitch).rotate_xz_by(yaw)
    }
}

/// Component-wise `Vec3 op Vec3` plus its assigning form.
macro_rules! componentwise {
    ($tr:ident, $f:ident, $tr_assign:ident, $f_assign:ident, $op:tt) => {
        impl $tr for Vec3 {
            type Output = Vec3;
            #[inline]
            fn $f(self, o: Vec3) -> Vec3 {
                Vec3::new(self.x $op o.x, self.y $op o.y, self.z $op o.z)
            }
        }

        impl $tr_assign for Vec3 {
            #[inline]
            fn $f_assign(&mut self, o: Vec3) {
                *self = *self $op o;
            }
        }
    };
}

/// `Vec3 op f32`, applied to every component.
macro_rules! scalar {
    ($tr:ident, $f:ident, $op:tt) => {
        impl $tr<f32> for Vec3 {
            type Output = Vec3;
            #[inline]
            fn $f(self, k: f32) -> Vec3 {
                Vec3::new(self.x $op k, self.y $op k, self.z $op k)
            }
        }
    };
}

componentwise!(Add, add, AddAssign, add_assign, +);
componentwise!(Sub, sub, SubAssign, sub_assign, -);
scalar!(Mul, mul, *);
scalar!(Div, div, /);

impl Neg for Vec3 {
    type Output = Vec3;
    #[inline]
    fn neg(self) -> Vec3 {
        self * -1.0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    #[inline]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) / 2.0
    }

    #[inline]
    pub fn extent(&self) -> Vec3 {
        self.max - self.min
    }

    /// Radius of the sphere that encloses the box.
    #[inline]
    pub fn bounding_radius(&self) -> f32 {
        self.extent().length() * 0.5
    }

    #[inline]
    pub fn contains(&self, p: Vec3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }
}
