//!
//! Math library for bone transforms.
//!
//! Poses are arrays of `Transform` (translation, rotation, scale). Global transforms are
//! composed from local ones as `parent.mul_transform(&local)`, and decomposed back with
//! `global.relative_to(&parent)`. Both directions are exact inverses of each other for
//! non-degenerate scales.
//!

use glam::{Mat4, Quat, Vec3};

use crate::base::{KINDA_SMALL_NUMBER, SMALL_NUMBER};

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    #[inline]
    fn default() -> Transform {
        return Transform::IDENTITY;
    }
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    #[inline]
    pub const fn new(translation: Vec3, rotation: Quat, scale: Vec3) -> Transform {
        return Transform {
            translation,
            rotation,
            scale,
        };
    }

    #[inline]
    pub const fn from_translation(translation: Vec3) -> Transform {
        return Transform {
            translation,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        };
    }

    #[inline]
    pub const fn from_rotation(rotation: Quat) -> Transform {
        return Transform {
            translation: Vec3::ZERO,
            rotation,
            scale: Vec3::ONE,
        };
    }

    #[inline]
    pub const fn from_rotation_translation(rotation: Quat, translation: Vec3) -> Transform {
        return Transform {
            translation,
            rotation,
            scale: Vec3::ONE,
        };
    }

    /// Composes `child` (expressed in the space of `self`) into the space `self` lives in.
    #[inline]
    pub fn mul_transform(&self, child: &Transform) -> Transform {
        return Transform {
            translation: self.transform_point(child.translation),
            rotation: (self.rotation * child.rotation).normalize(),
            scale: self.scale * child.scale,
        };
    }

    /// Expresses `self` in the space of `parent`.
    ///
    /// `parent.mul_transform(&self.relative_to(parent)) == self` for any `parent` without
    /// zero scale components.
    #[inline]
    pub fn relative_to(&self, parent: &Transform) -> Transform {
        let inv_rotation = parent.rotation.inverse();
        let inv_scale = safe_scale_recip(parent.scale);
        return Transform {
            translation: (inv_rotation * (self.translation - parent.translation)) * inv_scale,
            rotation: (inv_rotation * self.rotation).normalize(),
            scale: self.scale * inv_scale,
        };
    }

    /// Inverse transform. Exact for uniform scale, approximate for non-uniform scale.
    #[inline]
    pub fn inverse(&self) -> Transform {
        return Transform::IDENTITY.relative_to(self);
    }

    #[inline]
    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        return self.rotation * (self.scale * point) + self.translation;
    }

    #[inline]
    pub fn transform_vector(&self, vector: Vec3) -> Vec3 {
        return self.rotation * (self.scale * vector);
    }

    #[inline]
    pub fn inverse_transform_point(&self, point: Vec3) -> Vec3 {
        return (self.rotation.inverse() * (point - self.translation)) * safe_scale_recip(self.scale);
    }

    #[inline]
    pub fn inverse_transform_vector(&self, vector: Vec3) -> Vec3 {
        return (self.rotation.inverse() * vector) * safe_scale_recip(self.scale);
    }

    #[inline]
    pub fn to_mat4(&self) -> Mat4 {
        return Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation);
    }

    /// Decomposes a TRS matrix. Shear is dropped.
    #[inline]
    pub fn from_mat4(mat: &Mat4) -> Transform {
        let (scale, rotation, translation) = mat.to_scale_rotation_translation();
        return Transform {
            translation,
            rotation,
            scale,
        };
    }

    /// Blends translation and scale linearly, rotation with `quat_blend`.
    #[inline]
    pub fn lerp(from: &Transform, to: &Transform, alpha: f32) -> Transform {
        return Transform {
            translation: from.translation.lerp(to.translation, alpha),
            rotation: quat_blend(from.rotation, to.rotation, alpha),
            scale: from.scale.lerp(to.scale, alpha),
        };
    }

    #[inline]
    pub fn is_finite(&self) -> bool {
        return self.translation.is_finite() && self.rotation.is_finite() && self.scale.is_finite();
    }

    #[inline]
    pub fn abs_diff_eq(&self, other: &Transform, max_abs_diff: f32) -> bool {
        return self.translation.abs_diff_eq(other.translation, max_abs_diff)
            && quat_abs_diff_eq(self.rotation, other.rotation, max_abs_diff)
            && self.scale.abs_diff_eq(other.scale, max_abs_diff);
    }
}

/// Component-wise reciprocal, 0 where the component is near zero.
#[inline]
pub fn safe_scale_recip(scale: Vec3) -> Vec3 {
    #[inline(always)]
    fn recip(v: f32) -> f32 {
        if v.abs() <= SMALL_NUMBER {
            0.0
        } else {
            1.0 / v
        }
    }
    return Vec3::new(recip(scale.x), recip(scale.y), recip(scale.z));
}

/// `num / den`, or `fallback` when `den` is near zero.
#[inline]
pub fn safe_div(num: f32, den: f32, fallback: f32) -> f32 {
    if den.abs() <= SMALL_NUMBER {
        return fallback;
    }
    return num / den;
}

/// Normalized vector, or `None` for near-zero input.
#[inline]
pub fn safe_normalize(v: Vec3) -> Option<Vec3> {
    let len2 = v.length_squared();
    if len2 <= KINDA_SMALL_NUMBER * KINDA_SMALL_NUMBER {
        return None;
    }
    return Some(v / len2.sqrt());
}

/// Same orientation test, `q` and `-q` are considered equal.
#[inline]
pub fn quat_abs_diff_eq(a: Quat, b: Quat, max_abs_diff: f32) -> bool {
    return a.abs_diff_eq(b, max_abs_diff) || a.abs_diff_eq(-b, max_abs_diff);
}

/// Normalized linear blend between two rotations along the shortest path.
#[inline]
pub fn quat_blend(from: Quat, to: Quat, alpha: f32) -> Quat {
    if alpha <= 0.0 {
        return from;
    }
    if alpha >= 1.0 {
        return to;
    }
    let to = if from.dot(to) < 0.0 { -to } else { to };
    let blended = from * (1.0 - alpha) + to * alpha;
    let len2 = blended.length_squared();
    if len2 <= SMALL_NUMBER {
        return from;
    }
    return blended / len2.sqrt();
}

/// Shortest arc rotation taking direction `from` onto direction `to`.
/// Degenerate inputs yield identity.
#[inline]
pub fn quat_from_vectors(from: Vec3, to: Vec3) -> Quat {
    let (from, to) = match (safe_normalize(from), safe_normalize(to)) {
        (Some(from), Some(to)) => (from, to),
        _ => return Quat::IDENTITY,
    };
    return Quat::from_rotation_arc(from, to);
}

/// Splits `rotation` into `swing * twist` where `twist` rotates about `twist_axis`.
pub fn quat_swing_twist(rotation: Quat, twist_axis: Vec3) -> (Quat, Quat) {
    let axis = match safe_normalize(twist_axis) {
        Some(axis) => axis,
        None => return (rotation, Quat::IDENTITY),
    };
    let projection = Vec3::new(rotation.x, rotation.y, rotation.z).dot(axis) * axis;
    let twist = Quat::from_xyzw(projection.x, projection.y, projection.z, rotation.w);
    let len2 = twist.length_squared();
    let twist = if len2 <= SMALL_NUMBER {
        Quat::IDENTITY
    } else {
        twist / len2.sqrt()
    };
    let swing = (rotation * twist.inverse()).normalize();
    return (swing, twist);
}

/// Yaw angle (about +Z) of the horizontal projection of `v`.
#[inline]
pub fn yaw_of(v: Vec3) -> Option<f32> {
    if v.x.abs() <= SMALL_NUMBER && v.y.abs() <= SMALL_NUMBER {
        return None;
    }
    return Some(v.y.atan2(v.x));
}

#[cfg(test)]
mod tests {
    use core::f32::consts;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn random_transform(rng: &mut impl Rng, uniform: bool) -> Transform {
        let axis = Vec3::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0), rng.gen_range(0.1..1.0)).normalize();
        let scale = if uniform {
            Vec3::splat(rng.gen_range(0.5..2.0))
        } else {
            Vec3::new(rng.gen_range(0.5..2.0), rng.gen_range(0.5..2.0), rng.gen_range(0.5..2.0))
        };
        return Transform::new(
            Vec3::new(rng.gen_range(-50.0..50.0), rng.gen_range(-50.0..50.0), rng.gen_range(-50.0..50.0)),
            Quat::from_axis_angle(axis, rng.gen_range(-consts::PI..consts::PI)),
            scale,
        );
    }

    #[test]
    fn test_relative_round_trip() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..64 {
            let parent = random_transform(&mut rng, false);
            let global = random_transform(&mut rng, false);
            let local = global.relative_to(&parent);
            let back = parent.mul_transform(&local);
            assert!(back.abs_diff_eq(&global, 1e-3), "{:?} {:?}", back, global);
        }
    }

    #[test]
    fn test_inverse() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(11);
        for _ in 0..32 {
            let t = random_transform(&mut rng, true);
            let identity = t.mul_transform(&t.inverse());
            assert!(identity.abs_diff_eq(&Transform::IDENTITY, 1e-4));
            let p = Vec3::new(1.0, -2.0, 3.0);
            assert!(t.inverse_transform_point(t.transform_point(p)).abs_diff_eq(p, 1e-3));
        }
    }

    #[test]
    fn test_mat4() {
        let t = Transform::new(
            Vec3::new(1.0, 2.0, 3.0),
            Quat::from_rotation_z(consts::FRAC_PI_3),
            Vec3::splat(2.0),
        );
        let m = t.to_mat4();
        assert!(m
            .transform_point3(Vec3::X)
            .abs_diff_eq(t.transform_point(Vec3::X), 1e-5));
        assert!(Transform::from_mat4(&m).abs_diff_eq(&t, 1e-5));
    }

    #[test]
    fn test_zero_scale_is_safe() {
        let parent = Transform::new(Vec3::ONE, Quat::IDENTITY, Vec3::ZERO);
        let local = Transform::from_translation(Vec3::X).relative_to(&parent);
        assert!(local.is_finite());
    }

    #[test]
    fn test_quat_blend() {
        let a = Quat::IDENTITY;
        let b = Quat::from_rotation_z(consts::FRAC_PI_2);
        assert_eq!(quat_blend(a, b, 0.0), a);
        assert_eq!(quat_blend(a, b, 1.0), b);
        let half = quat_blend(a, b, 0.5);
        assert!(quat_abs_diff_eq(half, Quat::from_rotation_z(consts::FRAC_PI_4), 1e-4));

        // shortest path with negated input
        let half = quat_blend(a, -b, 0.5);
        assert!(quat_abs_diff_eq(half, Quat::from_rotation_z(consts::FRAC_PI_4), 1e-4));
    }

    #[test]
    fn test_quat_from_vectors() {
        let q = quat_from_vectors(Vec3::X, Vec3::Y * 3.0);
        assert!((q * Vec3::X).abs_diff_eq(Vec3::Y, 1e-5));
        assert_eq!(quat_from_vectors(Vec3::ZERO, Vec3::Y), Quat::IDENTITY);
    }

    #[test]
    fn test_swing_twist() {
        let twist = Quat::from_rotation_z(0.7);
        let swing = Quat::from_rotation_x(0.4);
        let (s, t) = quat_swing_twist(swing * twist, Vec3::Z);
        assert!(quat_abs_diff_eq(t, twist, 1e-4));
        assert!(quat_abs_diff_eq(s * t, swing * twist, 1e-4));

        let (s, t) = quat_swing_twist(Quat::from_rotation_x(consts::PI), Vec3::Z);
        assert!(t.is_finite() && s.is_finite());
    }

    #[test]
    fn test_safe_helpers() {
        assert_eq!(safe_div(1.0, 0.0, 5.0), 5.0);
        assert_eq!(safe_div(1.0, 2.0, 5.0), 0.5);
        assert_eq!(safe_normalize(Vec3::ZERO), None);
        assert_eq!(safe_normalize(Vec3::new(0.0, 0.0, 2.0)), Some(Vec3::Z));
        assert_eq!(yaw_of(Vec3::Z), None);
        assert!((yaw_of(Vec3::Y).unwrap() - consts::FRAC_PI_2).abs() < 1e-6);
    }
}
