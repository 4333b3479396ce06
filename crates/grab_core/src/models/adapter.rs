use super::{
    assets::ModelCache,
    context::ExecutionContext,
    mano::Mano,
    object::RigidObject,
    smpl_x::SmplX,
};
use crate::common::{
    error::{GrabError, GrabResult},
    types::{Gender, Handedness, ModelKind},
};
use grab_utils::numerical::batch_rodrigues;
use log::debug;
use ndarray as nd;
use std::collections::BTreeMap;

/// Named per frame parameters, each [T, D]
pub type PoseParams = BTreeMap<String, nd::Array2<f32>>;

/// Per frame geometry of one model evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct DeformOutput {
    /// [T, V, 3]
    pub vertices: nd::Array3<f32>,
    /// [T, J, 3], rigid models have no joints
    pub joints: Option<nd::Array3<f32>>,
}

/// Anything that maps per frame pose parameters to per frame geometry
pub trait DeformationModel: Send + Sync {
    fn kind(&self) -> ModelKind;
    fn forward(&self, ctx: &ExecutionContext, params: &PoseParams, batch_size: usize) -> GrabResult<DeformOutput>;
}

/// Identity part of an evaluation, fixed for a whole sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityConfig {
    Body { gender: Gender, n_comps: usize, flat_hand_mean: bool },
    Hand { handedness: Handedness, n_comps: usize, flat_hand_mean: bool },
    Rigid,
}

impl IdentityConfig {
    /// Body setup used for GRAB: PCA hands with the mean hand pose added
    pub fn body(gender: Gender, n_comps: usize) -> Self {
        IdentityConfig::Body {
            gender,
            n_comps,
            flat_hand_mean: false,
        }
    }

    /// Hand setup used for GRAB: PCA hands relative to a flat hand
    pub fn hand(handedness: Handedness, n_comps: usize) -> Self {
        IdentityConfig::Hand {
            handedness,
            n_comps,
            flat_hand_mean: true,
        }
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            IdentityConfig::Body { .. } => ModelKind::Body,
            IdentityConfig::Hand { .. } => ModelKind::Hand,
            IdentityConfig::Rigid => ModelKind::Object,
        }
    }
}

/// Clones a [T, width] parameter or returns zeros when the record has none
pub fn param_or_zeros(params: &PoseParams, name: &str, batch_size: usize, width: usize) -> nd::Array2<f32> {
    params.get(name).cloned().unwrap_or_else(|| nd::Array2::zeros((batch_size, width)))
}

/// Rotation matrices [T,3,3] of a hand from its global orientation [T,3].
/// The orientation is negated before the conversion, consumers of the hand
/// joint products expect this convention.
pub fn hand_rotation_matrices(global_orient: &nd::Array2<f32>) -> nd::Array3<f32> {
    batch_rodrigues(&global_orient.mapv(|x| -x))
}

/// Single entry point to every deformation model. Holds the execution context
/// and the shared model arrays, and counts evaluations.
#[derive(Debug)]
pub struct DeformationAdapter {
    ctx: ExecutionContext,
    cache: ModelCache,
    evaluations: usize,
}

impl DeformationAdapter {
    pub fn new(ctx: ExecutionContext, cache: ModelCache) -> Self {
        Self { ctx, cache, evaluations: 0 }
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    pub fn cache_mut(&mut self) -> &mut ModelCache {
        &mut self.cache
    }

    /// Number of model evaluations since creation
    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    /// Binds a template and an identity to a model instance
    pub fn instantiate(&mut self, template_vertices: &nd::Array2<f32>, identity: &IdentityConfig) -> GrabResult<Box<dyn DeformationModel>> {
        let model: Box<dyn DeformationModel> = match *identity {
            IdentityConfig::Body {
                gender,
                n_comps,
                flat_hand_mean,
            } => Box::new(SmplX::new(self.cache.smplx(gender)?, template_vertices.clone(), n_comps, flat_hand_mean)?),
            IdentityConfig::Hand {
                handedness,
                n_comps,
                flat_hand_mean,
            } => Box::new(Mano::new(self.cache.mano(handedness)?, template_vertices.clone(), n_comps, flat_hand_mean)?),
            IdentityConfig::Rigid => Box::new(RigidObject::new(template_vertices.clone())),
        };
        Ok(model)
    }

    /// Evaluates ``kind`` for ``batch_size`` frames. The result only depends on
    /// the template, the identity and the parameters.
    pub fn evaluate(
        &mut self,
        kind: ModelKind,
        template_vertices: &nd::Array2<f32>,
        identity: &IdentityConfig,
        pose_params: &PoseParams,
        batch_size: usize,
    ) -> GrabResult<DeformOutput> {
        if identity.kind() != kind {
            return Err(GrabError::invalid_params("adapter", format!("{kind} model requested with a {} identity", identity.kind())));
        }
        if template_vertices.ncols() != 3 {
            return Err(GrabError::invalid_params("adapter", format!("template has {} columns", template_vertices.ncols())));
        }
        let model = self.instantiate(template_vertices, identity)?;
        debug!("evaluating {kind} model on {batch_size} frames");
        let output = model.forward(&self.ctx, pose_params, batch_size)?;
        self.evaluations += 1;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{assets::ModelAssets, mano::tiny_mano, smpl_x::tiny_smplx};
    use ndarray::array;

    fn adapter() -> DeformationAdapter {
        let mut cache = ModelCache::new(ModelAssets::new(std::path::Path::new("/nonexistent")));
        cache.add_smplx(tiny_smplx(8));
        cache.add_mano(tiny_mano(Handedness::Left, 12));
        DeformationAdapter::new(ExecutionContext::sequential(), cache)
    }

    #[test]
    fn rotation_uses_negated_orientation() {
        let orient = array![[0.3_f32, -0.1, 0.7], [1.2, 0.0, -0.4]];
        let rot = hand_rotation_matrices(&orient);
        assert_eq!(rot, batch_rodrigues(&(-&orient)));
        assert_ne!(rot, batch_rodrigues(&orient));
    }

    #[test]
    fn evaluation_is_deterministic() {
        let mut adapter = adapter();
        let template = tiny_smplx(8).lbs.verts_template;
        let identity = IdentityConfig::body(Gender::Male, 6);
        let mut params = PoseParams::new();
        params.insert("body_pose".into(), nd::Array2::from_shape_fn((3, 63), |(t, i)| ((t + i) as f32 * 0.37).sin()));
        params.insert("left_hand_pose".into(), nd::Array2::from_elem((3, 6), 0.4));
        let a = adapter.evaluate(ModelKind::Body, &template, &identity, &params, 3).unwrap();
        let b = adapter.evaluate(ModelKind::Body, &template, &identity, &params, 3).unwrap();
        assert_eq!(a, b);
        assert_eq!(adapter.evaluations(), 2);
    }

    #[test]
    fn kind_must_match_identity() {
        let mut adapter = adapter();
        let err = adapter
            .evaluate(ModelKind::Hand, &nd::Array2::zeros((8, 3)), &IdentityConfig::Rigid, &PoseParams::new(), 1)
            .unwrap_err();
        assert!(matches!(err, GrabError::InvalidParams { .. }));
        assert_eq!(adapter.evaluations(), 0);
    }

    #[test]
    fn hand_and_object_dispatch() {
        let mut adapter = adapter();
        let hand_template = tiny_mano(Handedness::Left, 12).lbs.verts_template;
        let hand = adapter
            .evaluate(ModelKind::Hand, &hand_template, &IdentityConfig::hand(Handedness::Left, 6), &PoseParams::new(), 2)
            .unwrap();
        assert_eq!(hand.vertices.dim(), (2, 12, 3));
        let object = adapter
            .evaluate(ModelKind::Object, &nd::Array2::ones((5, 3)), &IdentityConfig::Rigid, &PoseParams::new(), 2)
            .unwrap();
        assert_eq!(object.vertices.dim(), (2, 5, 3));
        assert!(matches!(
            adapter.evaluate(ModelKind::Hand, &hand_template, &IdentityConfig::hand(Handedness::Right, 6), &PoseParams::new(), 2),
            Err(GrabError::NotFound { .. })
        ));
    }
}
