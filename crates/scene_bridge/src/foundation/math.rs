//! Math utilities and types
//!
//! Provides the matrix and vector types used for scene translation. Host
//! and backend transforms are double precision; colors stay single
//! precision.

pub use nalgebra::{Matrix4, Vector3};

/// 3D vector type
pub type Vec3 = Vector3<f64>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f64>;

/// RGB color triple, e.g. a per-particle tint
pub type Color = Vector3<f32>;

/// Extension trait for Mat4 with the helpers scene translation needs
pub trait Mat4Ext {
    /// Create a rotation matrix around the Y axis
    fn rotation_y(angle: f64) -> Mat4;

    /// Translation component of the matrix
    fn translation_part(&self) -> Vec3;

    /// Copy of the matrix with its translation component replaced
    fn with_translation(&self, translation: Vec3) -> Mat4;

    /// Copy of the matrix with only its translation component scaled.
    ///
    /// Used when placing cameras directly in world space: the global scene
    /// scale must move the camera without shrinking its orientation basis.
    fn scaled_translation(&self, factor: f64) -> Mat4;

    /// Invert, falling back to identity for singular matrices
    fn inverse_or_identity(&self) -> Mat4;
}

impl Mat4Ext for Mat4 {
    fn rotation_y(angle: f64) -> Mat4 {
        Mat4::from_axis_angle(&Vec3::y_axis(), angle)
    }

    fn translation_part(&self) -> Vec3 {
        Vec3::new(self[(0, 3)], self[(1, 3)], self[(2, 3)])
    }

    fn with_translation(&self, translation: Vec3) -> Mat4 {
        let mut result = *self;
        result[(0, 3)] = translation.x;
        result[(1, 3)] = translation.y;
        result[(2, 3)] = translation.z;
        result
    }

    fn scaled_translation(&self, factor: f64) -> Mat4 {
        self.with_translation(self.translation_part() * factor)
    }

    fn inverse_or_identity(&self) -> Mat4 {
        self.try_inverse().unwrap_or_else(Mat4::identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_translation_part_reads_the_last_column() {
        let matrix = Mat4::new_translation(&Vec3::new(1.0, 2.0, 3.0));
        assert_relative_eq!(matrix.translation_part().x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(matrix.translation_part().z, 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_scaled_translation_keeps_basis() {
        let matrix = Mat4::rotation_y(0.5).with_translation(Vec3::new(2.0, 0.0, -4.0));
        let scaled = matrix.scaled_translation(10.0);
        assert_relative_eq!(scaled.translation_part().x, 20.0, epsilon = 1e-12);
        assert_relative_eq!(scaled.translation_part().z, -40.0, epsilon = 1e-12);
        // rotation block untouched
        assert_relative_eq!(scaled[(0, 0)], matrix[(0, 0)], epsilon = 1e-12);
        assert_relative_eq!(scaled[(2, 0)], matrix[(2, 0)], epsilon = 1e-12);
    }

    #[test]
    fn test_inverse_or_identity_on_singular() {
        let singular = Mat4::zeros();
        assert_eq!(singular.inverse_or_identity(), Mat4::identity());
    }
}
