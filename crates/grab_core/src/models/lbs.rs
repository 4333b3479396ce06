use crate::common::error::{GrabError, GrabResult};
use grab_utils::{
    io::NpzArchive,
    numerical::{batch_rigid_transform, batch_rodrigues},
};
use log::info;
use ndarray as nd;
use ndarray::prelude::*;
use std::{
    io::{Read, Seek},
    path::Path,
};

/// The arrays of a linear blend skinned model. Shared by the body and the hand
/// models, they only differ in how the full pose is assembled.
#[derive(Debug, Clone)]
pub struct LbsModel {
    pub verts_template: nd::Array2<f32>,
    pub faces: nd::Array2<usize>,
    /// [V*3, num shape components]
    pub shape_dirs: nd::Array2<f32>,
    /// [V*3, (J-1)*9], empty when the model carries no pose correctives
    pub pose_dirs: Option<nd::Array2<f32>>,
    /// [J, V]
    pub joint_regressor: nd::Array2<f32>,
    pub parent_idx_per_joint: Vec<usize>,
    /// [V, J]
    pub lbs_weights: nd::Array2<f32>,
}

/// Flattens [V,3,K] blend directions into [V*3,K]
pub fn flatten_dirs(dirs: &nd::Array3<f32>) -> nd::Array2<f32> {
    let (nr_verts, nr_channels, nr_dirs) = dirs.dim();
    nd::Array2::from_shape_fn((nr_verts * nr_channels, nr_dirs), |(r, k)| dirs[[r / nr_channels, r % nr_channels, k]])
}

/// Adds ``dirs · coeffs`` to ``verts``, using as many directions as there are
/// coefficients
pub fn add_blend_shapes(verts: &mut nd::Array2<f32>, dirs: &nd::Array2<f32>, coeffs: nd::ArrayView1<f32>) {
    let nr_used = coeffs.len().min(dirs.ncols());
    if nr_used == 0 {
        return;
    }
    let offsets = dirs.slice(s![.., 0..nr_used]).dot(&coeffs.slice(s![0..nr_used]));
    for (i, mut v) in verts.axis_iter_mut(nd::Axis(0)).enumerate() {
        v[0] += offsets[i * 3];
        v[1] += offsets[i * 3 + 1];
        v[2] += offsets[i * 3 + 2];
    }
}

impl LbsModel {
    /// # Errors
    /// When an array is missing or the sizes do not agree with each other
    pub fn new_from_reader<R: Read + Seek>(npz: &mut NpzArchive<R>, path: &Path) -> GrabResult<Self> {
        let read_err = |e| GrabError::from_model(path, e);
        let verts_template: nd::Array2<f32> = npz.read_f32("v_template").map_err(read_err)?;
        let faces: nd::Array2<usize> = npz.read_indices("f").map_err(read_err)?;
        let shape_dirs: nd::Array3<f32> = npz.read_f32("shapedirs").map_err(read_err)?;
        let pose_dirs: Option<nd::Array3<f32>> = if npz.contains("posedirs") {
            Some(npz.read_f32("posedirs").map_err(read_err)?)
        } else {
            None
        };
        let joint_regressor: nd::Array2<f32> = npz.read_f32("J_regressor").map_err(read_err)?;
        let kintree: nd::Array2<usize> = npz.read_indices("kintree_table").map_err(read_err)?;
        let lbs_weights: nd::Array2<f32> = npz.read_f32("weights").map_err(read_err)?;

        let mut parent_idx_per_joint = kintree.row(0).to_vec();
        if let Some(root) = parent_idx_per_joint.first_mut() {
            *root = 0;
        }
        let model = Self {
            verts_template,
            faces,
            shape_dirs: flatten_dirs(&shape_dirs),
            pose_dirs: pose_dirs.as_ref().map(flatten_dirs),
            joint_regressor,
            parent_idx_per_joint,
            lbs_weights,
        };
        model.check(path)?;
        info!(
            "loaded skinning model {} with {} verts and {} joints",
            path.display(),
            model.num_verts(),
            model.num_joints()
        );
        Ok(model)
    }

    pub fn num_verts(&self) -> usize {
        self.verts_template.nrows()
    }

    pub fn num_joints(&self) -> usize {
        self.joint_regressor.nrows()
    }

    fn check(&self, path: &Path) -> GrabResult<()> {
        let invalid = |reason: String| GrabError::ModelAsset {
            path: path.to_path_buf(),
            reason,
        };
        let (nr_verts, nr_joints) = (self.num_verts(), self.num_joints());
        if nr_joints == 0 {
            return Err(invalid("J_regressor has no joints".to_string()));
        }
        if self.verts_template.ncols() != 3 {
            return Err(invalid(format!("v_template has {} columns", self.verts_template.ncols())));
        }
        if self.shape_dirs.nrows() != nr_verts * 3 {
            return Err(invalid(format!("shapedirs covers {} values, expected {}", self.shape_dirs.nrows(), nr_verts * 3)));
        }
        if let Some(pose_dirs) = &self.pose_dirs {
            if pose_dirs.nrows() != nr_verts * 3 || pose_dirs.ncols() != (nr_joints - 1) * 9 {
                return Err(invalid(format!("posedirs has shape {:?}", pose_dirs.shape())));
            }
        }
        if self.joint_regressor.ncols() != nr_verts {
            return Err(invalid(format!("J_regressor has {} columns for {nr_verts} verts", self.joint_regressor.ncols())));
        }
        if self.lbs_weights.dim() != (nr_verts, nr_joints) {
            return Err(invalid(format!("weights has shape {:?}", self.lbs_weights.shape())));
        }
        if self.parent_idx_per_joint.len() != nr_joints {
            return Err(invalid(format!("kintree_table has {} joints, expected {nr_joints}", self.parent_idx_per_joint.len())));
        }
        if let Some((joint, parent)) = self.parent_idx_per_joint.iter().enumerate().skip(1).find(|(i, p)| **p >= *i) {
            return Err(invalid(format!("joint {joint} has parent {parent} which is not earlier in the chain")));
        }
        if let Some(max_face_idx) = self.faces.iter().max() {
            if *max_face_idx >= nr_verts {
                return Err(invalid(format!("face index {max_face_idx} out of range")));
            }
        }
        Ok(())
    }

    /// Poses one frame. ``verts_shaped`` is the template with shape offsets
    /// already added, ``full_pose`` is [J,3] axis-angle. Returns posed verts
    /// [V,3] and posed joints [J,3], both without translation.
    pub fn pose(&self, verts_shaped: &nd::Array2<f32>, full_pose: &nd::Array2<f32>) -> (nd::Array2<f32>, nd::Array2<f32>) {
        let joints = self.joint_regressor.dot(verts_shaped);
        let rot_mats = batch_rodrigues(full_pose);

        //pose correctives from (R - I) of every joint except the root
        let mut verts_posed = verts_shaped.clone();
        if let Some(pose_dirs) = &self.pose_dirs {
            let nr_joints = rot_mats.shape()[0];
            let mut pose_feature = nd::Array1::<f32>::zeros((nr_joints - 1) * 9);
            for j in 1..nr_joints {
                for r in 0..3 {
                    for c in 0..3 {
                        let ident = if r == c { 1.0 } else { 0.0 };
                        pose_feature[(j - 1) * 9 + r * 3 + c] = rot_mats[[j, r, c]] - ident;
                    }
                }
            }
            add_blend_shapes(&mut verts_posed, pose_dirs, pose_feature.view());
        }

        let (posed_joints, rel_transforms) = batch_rigid_transform(&self.parent_idx_per_joint, &rot_mats, &joints);

        //blend the per joint transforms with the skinning weights, T = W · A
        let nr_joints = rel_transforms.shape()[0];
        let a_flat = nd::Array2::from_shape_fn((nr_joints, 16), |(j, k)| rel_transforms[[j, k / 4, k % 4]]);
        let t_flat = self.lbs_weights.dot(&a_flat);

        let mut verts = nd::Array2::<f32>::zeros(verts_posed.raw_dim());
        for ((mut out, v), t) in verts.axis_iter_mut(nd::Axis(0)).zip(verts_posed.axis_iter(nd::Axis(0))).zip(t_flat.axis_iter(nd::Axis(0))) {
            for r in 0..3 {
                out[r] = t[r * 4] * v[0] + t[r * 4 + 1] * v[1] + t[r * 4 + 2] * v[2] + t[r * 4 + 3];
            }
        }

        (verts, posed_joints)
    }
}
