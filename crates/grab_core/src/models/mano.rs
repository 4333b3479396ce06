use super::{
    adapter::{param_or_zeros, DeformOutput, DeformationModel, PoseParams},
    context::{stack_frames, ExecutionContext},
    lbs::{add_blend_shapes, LbsModel},
    smpl_x::{HandPca, HAND_POSE_DIM, NUM_HAND_JOINTS},
};
use crate::common::{
    error::{GrabError, GrabResult},
    types::{Handedness, ModelKind},
};
use grab_utils::io::NpzArchive;
use log::info;
use ndarray as nd;
use std::{path::Path, sync::Arc};

/// The MANO arrays of one hand
#[derive(Debug, Clone)]
pub struct ManoData {
    pub handedness: Handedness,
    pub lbs: LbsModel,
    pub pca: HandPca,
}

impl ManoData {
    pub fn new_from_npz(path: &Path, handedness: Handedness) -> GrabResult<Self> {
        let mut npz = NpzArchive::open(path).map_err(|e| GrabError::from_model(path, e))?;
        let lbs = LbsModel::new_from_reader(&mut npz, path)?;
        let components: nd::Array2<f32> = npz.read_f32("hands_components").map_err(|e| GrabError::from_model(path, e))?;
        let mean: nd::Array1<f32> = npz.read_f32("hands_mean").map_err(|e| GrabError::from_model(path, e))?;
        let data = Self::new_from_parts(handedness, lbs, HandPca { components, mean });
        data.check(path)?;
        info!("loaded MANO {handedness} model from {}", path.display());
        Ok(data)
    }

    pub fn new_from_parts(handedness: Handedness, lbs: LbsModel, pca: HandPca) -> Self {
        Self { handedness, lbs, pca }
    }

    fn check(&self, path: &Path) -> GrabResult<()> {
        let invalid = |reason: String| GrabError::ModelAsset {
            path: path.to_path_buf(),
            reason,
        };
        if self.lbs.num_joints() != NUM_HAND_JOINTS + 1 {
            return Err(invalid(format!("expected {} joints, found {}", NUM_HAND_JOINTS + 1, self.lbs.num_joints())));
        }
        if self.pca.components.ncols() != HAND_POSE_DIM || self.pca.mean.len() != HAND_POSE_DIM {
            return Err(invalid(format!("hand pca has shape {:?}", self.pca.components.shape())));
        }
        Ok(())
    }
}

/// A MANO hand bound to a personalized template
#[derive(Debug, Clone)]
pub struct Mano {
    data: Arc<ManoData>,
    verts_template: nd::Array2<f32>,
    n_comps: usize,
    flat_hand_mean: bool,
}

impl Mano {
    pub fn new(data: Arc<ManoData>, verts_template: nd::Array2<f32>, n_comps: usize, flat_hand_mean: bool) -> GrabResult<Self> {
        if verts_template.dim() != data.lbs.verts_template.dim() {
            return Err(GrabError::invalid_params(
                "hand",
                format!("template has shape {:?}, the model expects {:?}", verts_template.shape(), data.lbs.verts_template.shape()),
            ));
        }
        Ok(Self {
            data,
            verts_template,
            n_comps,
            flat_hand_mean,
        })
    }

    pub fn handedness(&self) -> Handedness {
        self.data.handedness
    }

    fn check_params(&self, params: &PoseParams, batch_size: usize) -> GrabResult<()> {
        for (name, width) in [("global_orient", 3), ("transl", 3), ("hand_pose", 0), ("betas", 0)] {
            let Some(p) = params.get(name) else { continue };
            let rows_ok = p.nrows() == batch_size || (name == "betas" && p.nrows() == 1);
            if !rows_ok {
                return Err(GrabError::invalid_params("hand", format!("{name} has {} frames, expected {batch_size}", p.nrows())));
            }
            if width > 0 && p.ncols() != width {
                return Err(GrabError::invalid_params("hand", format!("{name} has width {}, expected {width}", p.ncols())));
            }
        }
        if let Some(p) = params.get("hand_pose") {
            self.data.pca.check_width(p.ncols(), self.n_comps, "hand")?;
        }
        Ok(())
    }

    fn full_pose(&self, params: &PoseParams, frame: usize) -> nd::Array2<f32> {
        let mut full_pose = nd::Array2::<f32>::zeros((NUM_HAND_JOINTS + 1, 3));
        if let Some(orient) = params.get("global_orient") {
            full_pose.row_mut(0).assign(&orient.row(frame));
        }
        let hand_pose = match params.get("hand_pose") {
            Some(p) => self.data.pca.full_pose(p.row(frame), !self.flat_hand_mean),
            None if !self.flat_hand_mean => self.data.pca.mean.clone(),
            None => nd::Array1::zeros(HAND_POSE_DIM),
        };
        for (i, v) in hand_pose.iter().enumerate() {
            full_pose[[1 + i / 3, i % 3]] = *v;
        }
        full_pose
    }
}

impl DeformationModel for Mano {
    fn kind(&self) -> ModelKind {
        ModelKind::Hand
    }

    fn forward(&self, ctx: &ExecutionContext, params: &PoseParams, batch_size: usize) -> GrabResult<DeformOutput> {
        self.check_params(params, batch_size)?;
        let transl = param_or_zeros(params, "transl", batch_size, 3);
        let frames = ctx.map_frames(batch_size, |t| {
            let mut verts_shaped = self.verts_template.clone();
            if let Some(betas) = params.get("betas") {
                add_blend_shapes(&mut verts_shaped, &self.data.lbs.shape_dirs, betas.row(if betas.nrows() == 1 { 0 } else { t }));
            }
            let (mut verts, mut joints) = self.data.lbs.pose(&verts_shaped, &self.full_pose(params, t));
            verts += &transl.row(t);
            joints += &transl.row(t);
            (verts, joints)
        });
        let (verts, joints): (Vec<_>, Vec<_>) = frames.into_iter().unzip();
        Ok(DeformOutput {
            vertices: stack_frames(&verts),
            joints: Some(stack_frames(&joints)),
        })
    }
}

/// Builds a tiny model with the MANO joint layout, for tests
#[cfg(test)]
pub(crate) fn tiny_mano(handedness: Handedness, nr_verts: usize) -> ManoData {
    use super::lbs::flatten_dirs;
    let nr_joints = NUM_HAND_JOINTS + 1;
    let mut joint_regressor = nd::Array2::<f32>::zeros((nr_joints, nr_verts));
    let mut lbs_weights = nd::Array2::<f32>::zeros((nr_verts, nr_joints));
    for j in 0..nr_joints {
        joint_regressor[[j, j % nr_verts]] = 1.0;
    }
    for v in 0..nr_verts {
        lbs_weights[[v, v % nr_joints]] = 1.0;
    }
    let lbs = LbsModel {
        verts_template: nd::Array2::from_shape_fn((nr_verts, 3), |(v, c)| if c == v % 3 { 0.1 * v as f32 } else { 0.0 }),
        faces: nd::Array2::from_shape_fn((nr_verts.saturating_sub(2), 3), |(f, k)| f + k),
        shape_dirs: flatten_dirs(&nd::Array3::zeros((nr_verts, 3, 10))),
        pose_dirs: None,
        joint_regressor,
        parent_idx_per_joint: (0..nr_joints).map(|j| if j == 0 { 0 } else { (j - 1) / 3 * 3 }).collect(),
        lbs_weights,
    };
    let pca = HandPca {
        components: nd::Array2::from_shape_fn((HAND_POSE_DIM, HAND_POSE_DIM), |(r, c)| if r == c { 1.0 } else { 0.0 }),
        mean: nd::Array1::from_elem(HAND_POSE_DIM, 0.3),
    };
    ManoData::new_from_parts(handedness, lbs, pca)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn params(t: usize, n_comps: usize) -> PoseParams {
        let mut p = PoseParams::new();
        p.insert("global_orient".into(), nd::Array2::from_elem((t, 3), 0.3));
        p.insert("hand_pose".into(), nd::Array2::from_elem((t, n_comps), 0.1));
        p.insert("transl".into(), nd::Array2::from_shape_fn((t, 3), |(f, c)| (f * 3 + c) as f32));
        p
    }

    #[test]
    fn forward_produces_hand_joints() {
        let data = Arc::new(tiny_mano(Handedness::Left, 20));
        let template = data.lbs.verts_template.clone();
        let hand = Mano::new(data, template, 6, true).unwrap();
        let out = hand.forward(&ExecutionContext::sequential(), &params(4, 6), 4).unwrap();
        assert_eq!(out.vertices.dim(), (4, 20, 3));
        assert_eq!(out.joints.unwrap().dim(), (4, NUM_HAND_JOINTS + 1, 3));
        assert_eq!(hand.handedness(), Handedness::Left);
    }

    #[test]
    fn flat_mean_changes_rest_articulation() {
        let data = Arc::new(tiny_mano(Handedness::Right, 20));
        let template = data.lbs.verts_template.clone();
        let mut p = params(1, 6);
        p.remove("hand_pose");
        p.remove("global_orient");
        p.remove("transl");
        let flat = Mano::new(data.clone(), template.clone(), 6, true).unwrap();
        let out = flat.forward(&ExecutionContext::sequential(), &p, 1).unwrap();
        assert_relative_eq!(out.vertices.index_axis(nd::Axis(0), 0).to_owned(), template, epsilon = 1e-6);
        let with_mean = Mano::new(data, template.clone(), 6, false).unwrap();
        let out = with_mean.forward(&ExecutionContext::sequential(), &p, 1).unwrap();
        assert!(out.vertices.index_axis(nd::Axis(0), 0).iter().zip(template.iter()).any(|(a, b)| (a - b).abs() > 1e-4));
    }

    #[test]
    fn rejects_wrong_template_size() {
        let data = Arc::new(tiny_mano(Handedness::Right, 20));
        assert!(Mano::new(data, nd::Array2::zeros((19, 3)), 6, true).is_err());
    }
}
