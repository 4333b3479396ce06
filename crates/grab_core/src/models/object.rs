use super::{
    adapter::{param_or_zeros, DeformOutput, DeformationModel, PoseParams},
    context::{stack_frames, ExecutionContext},
};
use crate::common::{
    error::{GrabError, GrabResult},
    types::ModelKind,
};
use grab_utils::numerical::batch_rodrigues;
use ndarray as nd;
use ndarray::prelude::*;

/// A rigid mesh moved by a rotation and a translation per frame. Vertices are
/// row vectors, each frame computes ``v · R + t``.
#[derive(Debug, Clone)]
pub struct RigidObject {
    verts_template: nd::Array2<f32>,
}

impl RigidObject {
    pub fn new(verts_template: nd::Array2<f32>) -> Self {
        Self { verts_template }
    }
}

impl DeformationModel for RigidObject {
    fn kind(&self) -> ModelKind {
        ModelKind::Object
    }

    fn forward(&self, ctx: &ExecutionContext, params: &PoseParams, batch_size: usize) -> GrabResult<DeformOutput> {
        for name in ["global_orient", "transl"] {
            if let Some(p) = params.get(name) {
                if p.dim() != (batch_size, 3) {
                    return Err(GrabError::invalid_params("object", format!("{name} has shape {:?}, expected [{batch_size}, 3]", p.shape())));
                }
            }
        }
        let rot_mats = batch_rodrigues(&param_or_zeros(params, "global_orient", batch_size, 3));
        let transl = param_or_zeros(params, "transl", batch_size, 3);
        let frames = ctx.map_frames(batch_size, |t| {
            let mut verts = self.verts_template.dot(&rot_mats.slice(s![t, .., ..]));
            verts += &transl.row(t);
            verts
        });
        Ok(DeformOutput {
            vertices: stack_frames(&frames),
            joints: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn rotates_rows_and_translates() {
        let object = RigidObject::new(array![[1.0_f32, 0.0, 0.0], [0.0, 1.0, 0.0]]);
        let mut params = PoseParams::new();
        params.insert("global_orient".into(), array![[0.0_f32, 0.0, 0.0], [0.0, 0.0, std::f32::consts::FRAC_PI_2]]);
        params.insert("transl".into(), array![[0.0_f32, 0.0, 0.0], [0.0, 0.0, 1.0]]);
        let out = object.forward(&ExecutionContext::sequential(), &params, 2).unwrap();
        assert!(out.joints.is_none());
        assert_relative_eq!(out.vertices.slice(s![0, .., ..]).to_owned(), array![[1.0_f32, 0.0, 0.0], [0.0, 1.0, 0.0]], epsilon = 1e-6);
        //row vector times R is the transposed rotation
        assert_relative_eq!(out.vertices.slice(s![1, .., ..]).to_owned(), array![[0.0_f32, -1.0, 1.0], [1.0, 0.0, 1.0]], epsilon = 1e-5);
    }

    #[test]
    fn rejects_bad_orientation_shape() {
        let object = RigidObject::new(nd::Array2::zeros((4, 3)));
        let mut params = PoseParams::new();
        params.insert("global_orient".into(), nd::Array2::zeros((3, 4)));
        assert!(object.forward(&ExecutionContext::sequential(), &params, 3).is_err());
    }
}
