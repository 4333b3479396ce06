use nalgebra as na;

pub type Color3f = [f32; 3];
pub type Vector3f = na::Vector3<f32>;
pub type Matrix4f = na::Matrix4<f32>;

#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
pub fn color_to_u8(color: &Color3f) -> [u8; 3] {
    color.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8)
}

/// Rigid transform from a rotation and a translation
pub fn isometry_matrix(rot: &na::Matrix3<f32>, trans: &Vector3f) -> Matrix4f {
    let mut m = Matrix4f::identity();
    m.fixed_view_mut::<3, 3>(0, 0).copy_from(rot);
    m.fixed_view_mut::<3, 1>(0, 3).copy_from(trans);
    m
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_conversion_clamps() {
        assert_eq!(color_to_u8(&[0.0, 1.0, 2.0]), [0, 255, 255]);
        assert_eq!(color_to_u8(&[0.2, 0.4, 0.6]), [51, 102, 153]);
    }

    #[test]
    fn isometry_places_translation() {
        let m = isometry_matrix(&na::Matrix3::identity(), &Vector3f::new(-0.5, -4.0, 1.5));
        assert_eq!(m[(0, 3)], -0.5);
        assert_eq!(m[(2, 3)], 1.5);
        assert_eq!(m[(3, 3)], 1.0);
    }
}
