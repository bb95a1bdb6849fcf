//! Vector and bounding-box primitives shared by every component.

use serde::{Deserialize, Serialize};

/// 3D position / direction vector.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn splat(v: f32) -> Self {
        Self { x: v, y: v, z: v }
    }

    pub fn distance_squared(&self, other: &Self) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }

    pub fn distance(&self, other: &Self) -> f32 {
        self.distance_squared(other).sqrt()
    }

    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn normalize(&self) -> Self {
        let len = self.length();
        if len > 0.0 {
            Self {
                x: self.x / len,
                y: self.y / len,
                z: self.z / len,
            }
        } else {
            Self::ZERO
        }
    }

    pub fn min(&self, other: &Self) -> Self {
        Self::new(
            self.x.min(other.x),
            self.y.min(other.y),
            self.z.min(other.z),
        )
    }

    pub fn max(&self, other: &Self) -> Self {
        Self::new(
            self.x.max(other.x),
            self.y.max(other.y),
            self.z.max(other.z),
        )
    }

    /// Largest of the three components.
    pub fn max_element(&self) -> f32 {
        self.x.max(self.y).max(self.z)
    }

    pub fn abs(&self) -> Self {
        Self::new(self.x.abs(), self.y.abs(), self.z.abs())
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Component by axis index (0 = x, 1 = y, 2 = z).
    pub fn axis(&self, i: usize) -> f32 {
        match i {
            0 => self.x,
            1 => self.y,
            _ => self.z,
        }
    }
}

impl std::ops::Add for Vec3 {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            x: self.x + other.x,
            y: self.y + other.y,
            z: self.z + other.z,
        }
    }
}

impl std::ops::Sub for Vec3 {
    type Output = Self;
    fn sub(self, other: Self) -> Self {
        Self {
            x: self.x - other.x,
            y: self.y - other.y,
            z: self.z - other.z,
        }
    }
}

impl std::ops::Mul<f32> for Vec3 {
    type Output = Self;
    fn mul(self, scalar: f32) -> Self {
        Self {
            x: self.x * scalar,
            y: self.y * scalar,
            z: self.z * scalar,
        }
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min: min.min(&max),
            max: min.max(&max),
        }
    }

    /// Box centered on `center` with full edge lengths `size`.
    pub fn from_center_size(center: Vec3, size: Vec3) -> Self {
        let half = size.abs() * 0.5;
        Self {
            min: center - half,
            max: center + half,
        }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn half_extents(&self) -> Vec3 {
        self.size() * 0.5
    }

    /// Longest edge of the box.
    pub fn max_extent(&self) -> f32 {
        self.size().max_element()
    }

    /// Radius of the sphere enclosing the box.
    pub fn bounding_radius(&self) -> f32 {
        self.half_extents().length()
    }

    pub fn contains(&self, point: &Vec3) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
            && point.z >= self.min.z
            && point.z <= self.max.z
    }

    /// True if `other` lies entirely inside this box.
    pub fn encloses(&self, other: &Aabb) -> bool {
        self.contains(&other.min) && self.contains(&other.max)
    }

    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// Grow the box by `amount` on every side.
    pub fn expanded(&self, amount: f32) -> Self {
        let d = Vec3::splat(amount);
        Self {
            min: self.min - d,
            max: self.max + d,
        }
    }

    /// Slab test. Returns the entry distance along the ray, clamped to 0 when
    /// the origin is inside the box.
    pub fn ray_intersection(&self, origin: Vec3, dir: Vec3, max_distance: f32) -> Option<f32> {
        let mut t_min = 0.0f32;
        let mut t_max = max_distance;
        for i in 0..3 {
            let o = origin.axis(i);
            let d = dir.axis(i);
            let lo = self.min.axis(i);
            let hi = self.max.axis(i);
            if d.abs() < f32::EPSILON {
                if o < lo || o > hi {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / d;
            let mut t0 = (lo - o) * inv;
            let mut t1 = (hi - o) * inv;
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            t_min = t_min.max(t0);
            t_max = t_max.min(t1);
            if t_min > t_max {
                return None;
            }
        }
        Some(t_min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec3_operations() {
        let a = Vec3::new(1.0, 2.0, 3.0);
        let b = Vec3::new(4.0, 5.0, 6.0);

        let sum = a + b;
        assert_eq!(sum, Vec3::new(5.0, 7.0, 9.0));

        let diff = b - a;
        assert_eq!(diff.x, 3.0);

        let scaled = a * 2.0;
        assert_eq!(scaled.y, 4.0);
        assert_eq!(a.max_element(), 3.0);
    }

    #[test]
    fn test_vec3_normalize() {
        let v = Vec3::new(3.0, 4.0, 0.0);
        assert!((v.normalize().length() - 1.0).abs() < 0.001);
        assert_eq!(Vec3::ZERO.normalize(), Vec3::ZERO);
    }

    #[test]
    fn test_aabb_from_center_size() {
        let bb = Aabb::from_center_size(Vec3::new(1.0, 0.0, 0.0), Vec3::splat(2.0));
        assert_eq!(bb.min, Vec3::new(0.0, -1.0, -1.0));
        assert_eq!(bb.max, Vec3::new(2.0, 1.0, 1.0));
        assert_eq!(bb.center(), Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(bb.max_extent(), 2.0);
    }

    #[test]
    fn test_aabb_intersects_touching() {
        let a = Aabb::from_center_size(Vec3::ZERO, Vec3::splat(2.0));
        let b = Aabb::from_center_size(Vec3::new(2.0, 0.0, 0.0), Vec3::splat(2.0));
        let c = Aabb::from_center_size(Vec3::new(2.5, 0.0, 0.0), Vec3::splat(2.0));
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_aabb_encloses() {
        let outer = Aabb::new(Vec3::splat(-10.0), Vec3::splat(10.0));
        let inner = Aabb::from_center_size(Vec3::ZERO, Vec3::splat(2.0));
        assert!(outer.encloses(&inner));
        assert!(!inner.encloses(&outer));
    }

    #[test]
    fn test_ray_hits_box_in_front() {
        let bb = Aabb::from_center_size(Vec3::new(10.0, 0.0, 0.0), Vec3::splat(2.0));
        let t = bb
            .ray_intersection(Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0), 100.0)
            .unwrap();
        assert!((t - 9.0).abs() < 1e-4);
        assert!(bb
            .ray_intersection(Vec3::ZERO, Vec3::new(-1.0, 0.0, 0.0), 100.0)
            .is_none());
        assert!(bb
            .ray_intersection(Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0), 5.0)
            .is_none());
    }

    #[test]
    fn test_ray_from_inside_box() {
        let bb = Aabb::from_center_size(Vec3::ZERO, Vec3::splat(2.0));
        let t = bb
            .ray_intersection(Vec3::ZERO, Vec3::new(0.0, 1.0, 0.0), 10.0)
            .unwrap();
        assert_eq!(t, 0.0);
    }
}
