use nalgebra as na;
use ndarray as nd;
use ndarray::prelude::*;
use std::ops::{Div, SubAssign};

/// Calculates the rotation matrices for a batch of axis-angle vectors of shape
/// [N, 3]. The result has shape [N, 3, 3].
pub fn batch_rodrigues(full_pose: &nd::Array2<f32>) -> nd::Array3<f32> {
    let mut rotations_per_join = nd::Array3::<f32>::zeros((full_pose.nrows(), 3, 3));

    for (idx, v) in full_pose.axis_iter(nd::Axis(0)).enumerate() {
        let angle = v.iter().map(|x| x * x).sum::<f32>().sqrt(); //l2 norm

        let rot_dir = v.to_owned().div(angle + 1e-8);
        let cos = angle.cos();
        let sin = angle.sin();

        let (rx, ry, rz) = (rot_dir[0], rot_dir[1], rot_dir[2]);

        let k = array![[0.0, -rz, ry], [rz, 0.0, -rx], [-ry, rx, 0.0]];
        let identity = nd::Array2::<f32>::eye(3);
        let rot_mat = identity + sin * k.clone() + (1.0 - cos) * k.dot(&k);
        rotations_per_join.slice_mut(s![idx, .., ..]).assign(&rot_mat);
    }

    rotations_per_join
}

/// Same as [`batch_rodrigues`] but for a single axis-angle row
pub fn rodrigues(axis_angle: nd::ArrayView1<f32>) -> nd::Array2<f32> {
    let batch = axis_angle.to_owned().insert_axis(nd::Axis(0));
    batch_rodrigues(&batch).index_axis_move(nd::Axis(0), 0)
}

/// Poses a kinematic chain. ``parents[i]`` is the parent of joint i, the entry
/// of the root (index 0) is ignored. ``rot_mats`` is [J,3,3] with the local
/// rotation of each joint and ``joints`` [J,3] are the rest positions.
/// Returns the posed joints [J,3] and the transforms [J,4,4] relative to the
/// rest pose, ready to be blended for skinning.
#[allow(clippy::similar_names)]
pub fn batch_rigid_transform(parents: &[usize], rot_mats: &nd::Array3<f32>, joints: &nd::Array2<f32>) -> (nd::Array2<f32>, nd::Array3<f32>) {
    let num_joints = joints.nrows();
    let mut rel_joints = joints.clone(); //contains the relative position to the parent joint

    // rel_joints[:, 1:] -= joints[:, parents[1:]]
    for (idx_cur, &idx_parent) in parents.iter().enumerate().take(num_joints).skip(1) {
        let parent_joint_position = joints.row(idx_parent);
        rel_joints.row_mut(idx_cur).sub_assign(&parent_joint_position);
    }

    let mut transforms_mat = nd::Array3::<f32>::zeros((num_joints, 4, 4));
    for idx in 0..num_joints {
        transforms_mat.slice_mut(s![idx, 0..3, 0..3]).assign(&rot_mats.slice(s![idx, .., ..]));
        transforms_mat.slice_mut(s![idx, 0..3, 3]).assign(&rel_joints.row(idx));
        transforms_mat[[idx, 3, 3]] = 1.0;
    }

    let mut transform_chain: Vec<nd::Array2<f32>> = Vec::with_capacity(num_joints);
    transform_chain.push(transforms_mat.slice(s![0, .., ..]).to_owned());
    for i in 1..num_joints {
        let curr_res = transform_chain[parents[i]].dot(&transforms_mat.slice(s![i, .., ..]));
        transform_chain.push(curr_res);
    }

    //get posed joints as just the translation part of the transform chain
    let mut posed_joints = joints.clone();
    for (i, tf) in transform_chain.iter().enumerate() {
        posed_joints.row_mut(i).assign(&tf.slice(s![0..3, 3]));
    }

    //the rigid transformations of all the joints relative to the rest pose
    let mut rel_transforms = nd::Array3::<f32>::zeros((num_joints, 4, 4));
    for (i, transform) in transform_chain.iter().enumerate() {
        let joint_homogen = array![joints[[i, 0]], joints[[i, 1]], joints[[i, 2]], 0.0];
        let transformed_joint = transform.dot(&joint_homogen);

        let mut rel = transform.clone();
        rel.slice_mut(s![0..4, 3]).sub_assign(&transformed_joint);
        rel_transforms.slice_mut(s![i, .., ..]).assign(&rel);
    }

    (posed_joints, rel_transforms)
}

/// Builds a rotation from successive rotations around the axes named in
/// ``order`` (e.g. "xzx"). Each new rotation is applied on the left of the
/// accumulated one. Angles are in degrees.
pub fn euler(angles_deg: [f32; 3], order: &str) -> na::Matrix3<f32> {
    let mut r = na::Matrix3::<f32>::identity();
    for (theta, axis) in angles_deg.iter().map(|a| a.to_radians()).zip(order.chars()) {
        let (c, s) = (theta.cos(), theta.sin());
        let rot = match axis {
            'x' => na::Matrix3::new(1.0, 0.0, 0.0, 0.0, c, -s, 0.0, s, c),
            'y' => na::Matrix3::new(c, 0.0, s, 0.0, 1.0, 0.0, -s, 0.0, c),
            'z' => na::Matrix3::new(c, -s, 0.0, s, c, 0.0, 0.0, 0.0, 1.0),
            _ => na::Matrix3::identity(),
        };
        r = rot * r;
    }
    r
}

/// Converts a ndarray 3x3 view into a nalgebra matrix
pub fn to_matrix3(m: nd::ArrayView2<f32>) -> na::Matrix3<f32> {
    na::Matrix3::from_fn(|r, c| m[[r, c]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn rodrigues_of_zero_is_identity() {
        let rot = batch_rodrigues(&nd::Array2::zeros((2, 3)));
        for r in rot.outer_iter() {
            for (a, b) in r.iter().zip(nd::Array2::<f32>::eye(3).iter()) {
                assert_relative_eq!(*a, *b, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn rodrigues_matches_nalgebra() {
        let aa = array![[0.3_f32, -0.2, 0.9], [0.0, 0.0, std::f32::consts::FRAC_PI_2]];
        let rot = batch_rodrigues(&aa);
        for (i, row) in aa.outer_iter().enumerate() {
            let expected = na::Rotation3::new(na::Vector3::new(row[0], row[1], row[2]));
            let got = to_matrix3(rot.slice(s![i, .., ..]));
            assert_relative_eq!(got, *expected.matrix(), epsilon = 1e-5);
        }
    }

    #[test]
    fn rigid_transform_identity_keeps_joints() {
        let joints = array![[0.0_f32, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 2.0, 0.5]];
        let mut rots = nd::Array3::<f32>::zeros((3, 3, 3));
        for i in 0..3 {
            rots.slice_mut(s![i, .., ..]).assign(&nd::Array2::eye(3));
        }
        let (posed, rel) = batch_rigid_transform(&[0, 0, 1], &rots, &joints);
        assert_relative_eq!(posed, joints, epsilon = 1e-6);
        for i in 0..3 {
            assert_relative_eq!(rel.slice(s![i, 0..3, 3]).to_owned(), nd::Array1::<f32>::zeros(3), epsilon = 1e-6);
        }
    }

    #[test]
    fn rigid_transform_rotates_children() {
        let joints = array![[0.0_f32, 0.0, 0.0], [1.0, 0.0, 0.0]];
        let rots = batch_rodrigues(&array![[0.0_f32, 0.0, std::f32::consts::FRAC_PI_2], [0.0, 0.0, 0.0]]);
        let (posed, _) = batch_rigid_transform(&[0, 0], &rots, &joints);
        assert_relative_eq!(posed.row(1).to_owned(), array![0.0_f32, 1.0, 0.0], epsilon = 1e-5);
    }

    #[test]
    fn euler_single_axis() {
        let r = euler([90.0, 0.0, 0.0], "xzx");
        let v = r * na::Vector3::new(0.0_f32, 1.0, 0.0);
        assert_relative_eq!(v, na::Vector3::new(0.0, 0.0, 1.0), epsilon = 1e-6);
    }
}
