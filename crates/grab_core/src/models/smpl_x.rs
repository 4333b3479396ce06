use super::{
    adapter::{param_or_zeros, DeformOutput, DeformationModel, PoseParams},
    context::{stack_frames, ExecutionContext},
    lbs::{add_blend_shapes, flatten_dirs, LbsModel},
};
use crate::common::{
    error::{GrabError, GrabResult},
    types::{Gender, Handedness, ModelKind},
};
use enum_map::EnumMap;
use grab_utils::{array::GatherRows, io::NpzArchive};
use log::{info, warn};
use ndarray as nd;
use ndarray::prelude::*;
use std::{path::Path, sync::Arc};

pub const NUM_BODY_JOINTS: usize = 21;
pub const NUM_HAND_JOINTS: usize = 15;
pub const NUM_FACE_JOINTS: usize = 3;
pub const NUM_JOINTS: usize = NUM_BODY_JOINTS + 2 * NUM_HAND_JOINTS + NUM_FACE_JOINTS;
pub const SHAPE_SPACE_DIM: usize = 300;
pub const NUM_BETAS: usize = 10;
pub const HAND_POSE_DIM: usize = NUM_HAND_JOINTS * 3;

/// Joint names of the extended SMPL-X output: the 55 skeletal joints, the 21
/// joints taken from vertices and the 51 static face landmarks
pub const JOINT_NAMES: [&str; 127] = [
    "pelvis",
    "left_hip",
    "right_hip",
    "spine1",
    "left_knee",
    "right_knee",
    "spine2",
    "left_ankle",
    "right_ankle",
    "spine3",
    "left_foot",
    "right_foot",
    "neck",
    "left_collar",
    "right_collar",
    "head",
    "left_shoulder",
    "right_shoulder",
    "left_elbow",
    "right_elbow",
    "left_wrist",
    "right_wrist",
    "jaw",
    "left_eye_smplhf",
    "right_eye_smplhf",
    "left_index1",
    "left_index2",
    "left_index3",
    "left_middle1",
    "left_middle2",
    "left_middle3",
    "left_pinky1",
    "left_pinky2",
    "left_pinky3",
    "left_ring1",
    "left_ring2",
    "left_ring3",
    "left_thumb1",
    "left_thumb2",
    "left_thumb3",
    "right_index1",
    "right_index2",
    "right_index3",
    "right_middle1",
    "right_middle2",
    "right_middle3",
    "right_pinky1",
    "right_pinky2",
    "right_pinky3",
    "right_ring1",
    "right_ring2",
    "right_ring3",
    "right_thumb1",
    "right_thumb2",
    "right_thumb3",
    "nose",
    "right_eye",
    "left_eye",
    "right_ear",
    "left_ear",
    "left_big_toe",
    "left_small_toe",
    "left_heel",
    "right_big_toe",
    "right_small_toe",
    "right_heel",
    "left_thumb",
    "left_index",
    "left_middle",
    "left_ring",
    "left_pinky",
    "right_thumb",
    "right_index",
    "right_middle",
    "right_ring",
    "right_pinky",
    "right_eye_brow1",
    "right_eye_brow2",
    "right_eye_brow3",
    "right_eye_brow4",
    "right_eye_brow5",
    "left_eye_brow5",
    "left_eye_brow4",
    "left_eye_brow3",
    "left_eye_brow2",
    "left_eye_brow1",
    "nose1",
    "nose2",
    "nose3",
    "nose4",
    "right_nose_2",
    "right_nose_1",
    "nose_middle",
    "left_nose_1",
    "left_nose_2",
    "right_eye1",
    "right_eye2",
    "right_eye3",
    "right_eye4",
    "right_eye5",
    "right_eye6",
    "left_eye4",
    "left_eye3",
    "left_eye2",
    "left_eye1",
    "left_eye6",
    "left_eye5",
    "right_mouth_1",
    "right_mouth_2",
    "right_mouth_3",
    "mouth_top",
    "left_mouth_3",
    "left_mouth_2",
    "left_mouth_1",
    "left_mouth_5",
    "left_mouth_4",
    "mouth_bottom",
    "right_mouth_4",
    "right_mouth_5",
    "right_lip_1",
    "right_lip_2",
    "lip_top",
    "left_lip_2",
    "left_lip_1",
    "left_lip_3",
    "lip_bottom",
    "right_lip_3",
];

/// Named SMPL-X vertices. The order is the order in which they are appended
/// to the skeletal joints.
pub const VERTEX_IDS: [(&str, usize); 21] = [
    ("nose", 9120),
    ("reye", 9929),
    ("leye", 9448),
    ("rear", 616),
    ("lear", 6),
    ("LBigToe", 5770),
    ("LSmallToe", 5780),
    ("LHeel", 8846),
    ("RBigToe", 8463),
    ("RSmallToe", 8474),
    ("RHeel", 8635),
    ("lthumb", 5361),
    ("lindex", 4933),
    ("lmiddle", 5058),
    ("lring", 5169),
    ("lpinky", 5286),
    ("rthumb", 8079),
    ("rindex", 7669),
    ("rmiddle", 7794),
    ("rring", 7905),
    ("rpinky", 8022),
];

/// Splits the `shapedirs` columns into shape and expression directions.
/// Models with the full 300 dim shape space keep the expressions after it,
/// older ones right after the first 10 betas.
pub fn split_shape_space(dirs: &nd::Array2<f32>) -> Result<(nd::Array2<f32>, Option<nd::Array2<f32>>), String> {
    let nr_dirs = dirs.ncols();
    if nr_dirs < NUM_BETAS {
        return Err(format!("shapedirs has {nr_dirs} directions, at least {NUM_BETAS} are needed"));
    }
    let shape_dim = if nr_dirs > SHAPE_SPACE_DIM { SHAPE_SPACE_DIM } else { NUM_BETAS };
    if nr_dirs == shape_dim {
        return Ok((dirs.clone(), None));
    }
    Ok((dirs.slice(s![.., 0..shape_dim]).to_owned(), Some(dirs.slice(s![.., shape_dim..]).to_owned())))
}

/// PCA basis of one hand's articulation
#[derive(Debug, Clone)]
pub struct HandPca {
    /// [num components, 45]
    pub components: nd::Array2<f32>,
    /// [45]
    pub mean: nd::Array1<f32>,
}

impl HandPca {
    /// Projects per frame PCA coefficients onto the first `coeffs.len()`
    /// components, giving the 15 joint axis-angles of the hand. A full width
    /// of 45 coefficients still goes through the basis.
    pub fn full_pose(&self, coeffs: nd::ArrayView1<f32>, add_mean: bool) -> nd::Array1<f32> {
        let mut pose = coeffs.dot(&self.components.slice(s![0..coeffs.len(), ..]));
        if add_mean {
            pose += &self.mean;
        }
        pose
    }

    pub fn check_width(&self, width: usize, n_comps: usize, model: &'static str) -> GrabResult<()> {
        if width != n_comps {
            return Err(GrabError::invalid_params(model, format!("hand pose has {width} values but n_comps is {n_comps}")));
        }
        if width > self.components.nrows() {
            return Err(GrabError::invalid_params(
                model,
                format!("hand pose has {width} components, the model only has {}", self.components.nrows()),
            ));
        }
        Ok(())
    }
}

/// Static face landmarks as barycentric points on faces
#[derive(Debug, Clone)]
pub struct FaceLandmarks {
    pub faces_idx: Vec<usize>,
    /// [L, 3]
    pub bary_coords: nd::Array2<f32>,
}

/// The SMPL-X model arrays of one gender, loaded once and shared
#[derive(Debug, Clone)]
pub struct SmplXData {
    pub gender: Gender,
    pub lbs: LbsModel,
    /// [V*3, num expression components]
    pub expression_dirs: Option<nd::Array2<f32>>,
    pub hands: EnumMap<Handedness, HandPca>,
    pub landmarks: Option<FaceLandmarks>,
    /// Vertex rows appended to the skeletal joints, empty when the mesh is too
    /// small to carry them
    pub vertex_joint_ids: Vec<usize>,
}

impl SmplXData {
    #[allow(clippy::too_many_lines)]
    pub fn new_from_npz(path: &Path, gender: Gender) -> GrabResult<Self> {
        let mut npz = NpzArchive::open(path).map_err(|e| GrabError::from_model(path, e))?;
        let read_err = |e| GrabError::from_model(path, e);
        let mut lbs = LbsModel::new_from_reader(&mut npz, path)?;
        if lbs.num_joints() != NUM_JOINTS + 1 {
            return Err(GrabError::ModelAsset {
                path: path.to_path_buf(),
                reason: format!("expected {} joints, found {}", NUM_JOINTS + 1, lbs.num_joints()),
            });
        }

        let (shape_dirs, expression_dirs) = split_shape_space(&lbs.shape_dirs).map_err(|reason| GrabError::ModelAsset {
            path: path.to_path_buf(),
            reason,
        })?;
        if expression_dirs.is_none() {
            warn!("{} carries no expression space", path.display());
        }
        lbs.shape_dirs = shape_dirs;

        let mut read_hand = |suffix: &str| -> GrabResult<HandPca> {
            let components: nd::Array2<f32> = npz.read_f32(&format!("hands_components{suffix}")).map_err(read_err)?;
            let mean: nd::Array1<f32> = npz.read_f32(&format!("hands_mean{suffix}")).map_err(read_err)?;
            Ok(HandPca { components, mean })
        };
        let hands = EnumMap::from_array([read_hand("l")?, read_hand("r")?]);

        let landmarks = if npz.contains("lmk_faces_idx") && npz.contains("lmk_bary_coords") {
            let faces_idx: nd::Array1<usize> = npz.read_indices("lmk_faces_idx").map_err(read_err)?;
            let bary_coords: nd::Array2<f32> = npz.read_f32("lmk_bary_coords").map_err(read_err)?;
            Some(FaceLandmarks {
                faces_idx: faces_idx.to_vec(),
                bary_coords,
            })
        } else {
            None
        };

        let data = Self::new_from_parts(gender, lbs, expression_dirs, hands, landmarks);
        data.check_hands(path)?;
        info!("loaded SMPL-X {gender} model from {}", path.display());
        Ok(data)
    }

    pub fn new_from_parts(
        gender: Gender,
        lbs: LbsModel,
        expression_dirs: Option<nd::Array2<f32>>,
        hands: EnumMap<Handedness, HandPca>,
        landmarks: Option<FaceLandmarks>,
    ) -> Self {
        let nr_verts = lbs.num_verts();
        let vertex_joint_ids: Vec<usize> = if VERTEX_IDS.iter().all(|(_, id)| *id < nr_verts) {
            VERTEX_IDS.iter().map(|(_, id)| *id).collect()
        } else {
            warn!("SMPL-X mesh with {nr_verts} verts is too small for the vertex joints, only skeletal joints are produced");
            Vec::new()
        };
        let landmarks = landmarks.filter(|lmk| {
            let valid = lmk.faces_idx.iter().all(|f| *f < lbs.faces.nrows()) && lmk.bary_coords.dim() == (lmk.faces_idx.len(), 3);
            if !valid {
                warn!("ignoring face landmarks that do not match the mesh");
            }
            valid
        });
        Self {
            gender,
            lbs,
            expression_dirs,
            hands,
            landmarks,
            vertex_joint_ids,
        }
    }

    fn check_hands(&self, path: &Path) -> GrabResult<()> {
        for (side, pca) in &self.hands {
            if pca.components.ncols() != HAND_POSE_DIM || pca.mean.len() != HAND_POSE_DIM {
                return Err(GrabError::ModelAsset {
                    path: path.to_path_buf(),
                    reason: format!("{side} hand pca has shape {:?}", pca.components.shape()),
                });
            }
        }
        Ok(())
    }

    /// Number of rows of the joint output
    pub fn num_output_joints(&self) -> usize {
        self.lbs.num_joints() + self.vertex_joint_ids.len() + self.landmarks.as_ref().map_or(0, |l| l.faces_idx.len())
    }
}

/// A SMPL-X body bound to a personalized template and the hand pose setup of
/// one sequence
#[derive(Debug, Clone)]
pub struct SmplX {
    data: Arc<SmplXData>,
    verts_template: nd::Array2<f32>,
    n_comps: usize,
    flat_hand_mean: bool,
}

/// Parameter names of the body blocks and their width per frame
const BODY_PARAMS: [(&str, usize); 8] = [
    ("global_orient", 3),
    ("body_pose", NUM_BODY_JOINTS * 3),
    ("jaw_pose", 3),
    ("leye_pose", 3),
    ("reye_pose", 3),
    ("transl", 3),
    ("left_hand_pose", 0),
    ("right_hand_pose", 0),
];

impl SmplX {
    pub fn new(data: Arc<SmplXData>, verts_template: nd::Array2<f32>, n_comps: usize, flat_hand_mean: bool) -> GrabResult<Self> {
        if verts_template.dim() != data.lbs.verts_template.dim() {
            return Err(GrabError::invalid_params(
                "body",
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

    fn check_params(&self, params: &PoseParams, batch_size: usize) -> GrabResult<()> {
        for (name, width) in BODY_PARAMS {
            let Some(p) = params.get(name) else { continue };
            if p.nrows() != batch_size {
                return Err(GrabError::invalid_params("body", format!("{name} has {} frames, expected {batch_size}", p.nrows())));
            }
            if width > 0 && p.ncols() != width {
                return Err(GrabError::invalid_params("body", format!("{name} has width {}, expected {width}", p.ncols())));
            }
        }
        for (name, side) in [("left_hand_pose", Handedness::Left), ("right_hand_pose", Handedness::Right)] {
            if let Some(p) = params.get(name) {
                self.data.hands[side].check_width(p.ncols(), self.n_comps, "body")?;
            }
        }
        for name in ["betas", "expression"] {
            if let Some(p) = params.get(name) {
                if p.nrows() != batch_size && p.nrows() != 1 {
                    return Err(GrabError::invalid_params("body", format!("{name} has {} rows, expected 1 or {batch_size}", p.nrows())));
                }
            }
        }
        Ok(())
    }

    /// Assembles the [55,3] axis-angle pose of one frame
    fn full_pose(&self, params: &PoseParams, frame: usize) -> nd::Array2<f32> {
        let mut full_pose = nd::Array2::<f32>::zeros((NUM_JOINTS + 1, 3));
        let mut set_rows = |start: usize, values: nd::ArrayView1<f32>| {
            for (i, v) in values.iter().enumerate() {
                full_pose[[start + i / 3, i % 3]] = *v;
            }
        };
        let row = |name: &str| params.get(name).map(|p| p.row(frame));
        if let Some(v) = row("global_orient") {
            set_rows(0, v);
        }
        if let Some(v) = row("body_pose") {
            set_rows(1, v);
        }
        let face_start = 1 + NUM_BODY_JOINTS;
        for (i, name) in ["jaw_pose", "leye_pose", "reye_pose"].into_iter().enumerate() {
            if let Some(v) = row(name) {
                set_rows(face_start + i, v);
            }
        }
        let hands_start = face_start + NUM_FACE_JOINTS;
        for (i, (name, side)) in [("left_hand_pose", Handedness::Left), ("right_hand_pose", Handedness::Right)].into_iter().enumerate() {
            let pca = &self.data.hands[side];
            let hand_pose = match row(name) {
                Some(coeffs) => pca.full_pose(coeffs, !self.flat_hand_mean),
                None if !self.flat_hand_mean => pca.mean.clone(),
                None => nd::Array1::zeros(HAND_POSE_DIM),
            };
            set_rows(hands_start + i * NUM_HAND_JOINTS, hand_pose.view());
        }
        full_pose
    }

    fn shaped_verts(&self, params: &PoseParams, frame: usize) -> nd::Array2<f32> {
        let mut verts = self.verts_template.clone();
        let row = |name: &str| params.get(name).map(|p| p.row(if p.nrows() == 1 { 0 } else { frame }));
        if let Some(betas) = row("betas") {
            add_blend_shapes(&mut verts, &self.data.lbs.shape_dirs, betas);
        }
        if let (Some(expression), Some(dirs)) = (row("expression"), &self.data.expression_dirs) {
            add_blend_shapes(&mut verts, dirs, expression);
        }
        verts
    }

    fn extra_joints(&self, verts: &nd::Array2<f32>, joints: &nd::Array2<f32>) -> nd::Array2<f32> {
        let nr_skeletal = joints.nrows();
        let nr_vertex_joints = self.data.vertex_joint_ids.len();
        let mut out = nd::Array2::<f32>::zeros((self.data.num_output_joints(), 3));
        out.slice_mut(s![0..nr_skeletal, ..]).assign(joints);
        if nr_vertex_joints > 0 {
            out.slice_mut(s![nr_skeletal..nr_skeletal + nr_vertex_joints, ..])
                .assign(&verts.gather_rows(&self.data.vertex_joint_ids));
        }
        if let Some(lmk) = &self.data.landmarks {
            let faces = &self.data.lbs.faces;
            let start = nr_skeletal + nr_vertex_joints;
            for (l, &face) in lmk.faces_idx.iter().enumerate() {
                for k in 0..3 {
                    let w = lmk.bary_coords[[l, k]];
                    let v = verts.row(faces[[face, k]]);
                    for c in 0..3 {
                        out[[start + l, c]] += w * v[c];
                    }
                }
            }
        }
        out
    }
}

impl DeformationModel for SmplX {
    fn kind(&self) -> ModelKind {
        ModelKind::Body
    }

    fn forward(&self, ctx: &ExecutionContext, params: &PoseParams, batch_size: usize) -> GrabResult<DeformOutput> {
        self.check_params(params, batch_size)?;
        let transl = param_or_zeros(params, "transl", batch_size, 3);
        let frames = ctx.map_frames(batch_size, |t| {
            let verts_shaped = self.shaped_verts(params, t);
            let (mut verts, joints) = self.data.lbs.pose(&verts_shaped, &self.full_pose(params, t));
            let mut joints = self.extra_joints(&verts, &joints);
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

/// Builds a tiny model with the SMPL-X joint layout, for tests
#[cfg(test)]
pub(crate) fn tiny_smplx(nr_verts: usize) -> SmplXData {
    let nr_joints = NUM_JOINTS + 1;
    let verts_template = nd::Array2::from_shape_fn((nr_verts, 3), |(v, c)| (v * 3 + c) as f32 * 0.01);
    let mut joint_regressor = nd::Array2::<f32>::zeros((nr_joints, nr_verts));
    let mut lbs_weights = nd::Array2::<f32>::zeros((nr_verts, nr_joints));
    for j in 0..nr_joints {
        joint_regressor[[j, j % nr_verts]] = 1.0;
    }
    for v in 0..nr_verts {
        lbs_weights[[v, v % nr_joints]] = 1.0;
    }
    let mut parents: Vec<usize> = (0..nr_joints).map(|j| j.saturating_sub(1)).collect();
    parents[0] = 0;
    let lbs = LbsModel {
        verts_template,
        faces: nd::Array2::from_shape_fn((nr_verts.saturating_sub(2), 3), |(f, k)| f + k),
        shape_dirs: flatten_dirs(&nd::Array3::from_elem((nr_verts, 3, 10), 0.01)),
        pose_dirs: Some(nd::Array2::from_elem((nr_verts * 3, NUM_JOINTS * 9), 0.001)),
        joint_regressor,
        parent_idx_per_joint: parents,
        lbs_weights,
    };
    let pca = HandPca {
        components: nd::Array2::from_shape_fn((HAND_POSE_DIM, HAND_POSE_DIM), |(r, c)| if r == c { 1.0 } else { 0.0 }),
        mean: nd::Array1::from_elem(HAND_POSE_DIM, 0.1),
    };
    SmplXData::new_from_parts(Gender::Male, lbs, None, EnumMap::from_array([pca.clone(), pca]), None)
}
