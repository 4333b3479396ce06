use super::{
    error::{GrabError, GrabResult},
    types::Handedness,
};
use crate::models::smpl_x;
use enum_map::EnumMap;
use grab_utils::array::{max_index, GatherPerFrame};
use ndarray as nd;
use std::collections::HashMap;
use strum::IntoEnumIterator;

/// Hand joints of one side, wrist first, named without the side prefix
pub const HAND_JOINTS: [&str; 16] = [
    "wrist", "index1", "index2", "index3", "middle1", "middle2", "middle3", "pinky1", "pinky2", "pinky3", "ring1", "ring2", "ring3", "thumb1",
    "thumb2", "thumb3",
];
/// Fingertip vertices of one side, named without the side prefix
pub const HAND_TIPS: [&str; 5] = ["thumb", "index", "middle", "ring", "pinky"];

/// Maps landmark names to rows of a model's joint and vertex outputs
#[derive(Debug, Clone)]
pub struct SemanticIndexTable {
    joints: HashMap<String, usize>,
    vertices: HashMap<String, usize>,
}

impl SemanticIndexTable {
    pub fn new<S: AsRef<str>>(joint_names: &[S], vertex_ids: &[(S, usize)]) -> Self {
        let joints = joint_names.iter().enumerate().map(|(i, n)| (n.as_ref().to_string(), i)).collect();
        let vertices = vertex_ids.iter().map(|(n, i)| (n.as_ref().to_string(), *i)).collect();
        Self { joints, vertices }
    }

    /// Table of the extended SMPL-X joint set and its named vertices
    pub fn smplx() -> Self {
        Self::new(&smpl_x::JOINT_NAMES, &smpl_x::VERTEX_IDS)
    }

    pub fn joint_index(&self, name: &str) -> GrabResult<usize> {
        self.joints.get(name).copied().ok_or_else(|| GrabError::UnknownLandmark {
            name: name.to_string(),
            table: "joint",
        })
    }

    pub fn vertex_index(&self, name: &str) -> GrabResult<usize> {
        self.vertices.get(name).copied().ok_or_else(|| GrabError::UnknownLandmark {
            name: name.to_string(),
            table: "vertex",
        })
    }

    /// Indices in the order of ``names``
    pub fn joint_indices<S: AsRef<str>>(&self, names: &[S]) -> GrabResult<Vec<usize>> {
        names.iter().map(|n| self.joint_index(n.as_ref())).collect()
    }

    pub fn vertex_indices<S: AsRef<str>>(&self, names: &[S]) -> GrabResult<Vec<usize>> {
        names.iter().map(|n| self.vertex_index(n.as_ref())).collect()
    }

    /// Slices [T,J,3] joints down to ``names``, rows follow the order of ``names``
    pub fn select_joints<S: AsRef<str>>(&self, joints: &nd::Array3<f32>, names: &[S]) -> GrabResult<nd::Array3<f32>> {
        let idx = self.joint_indices(names)?;
        select_rows(joints, &idx, "joint")
    }

    pub fn select_vertices<S: AsRef<str>>(&self, verts: &nd::Array3<f32>, names: &[S]) -> GrabResult<nd::Array3<f32>> {
        let idx = self.vertex_indices(names)?;
        select_rows(verts, &idx, "vertex")
    }
}

fn select_rows(arr: &nd::Array3<f32>, idx: &[usize], what: &'static str) -> GrabResult<nd::Array3<f32>> {
    let available = arr.shape()[1];
    if let Some(bad) = max_index(idx).filter(|&i| i >= available) {
        return Err(GrabError::invalid_params(
            "body",
            format!("{what} index {bad} is out of range for an output with {available} rows"),
        ));
    }
    Ok(arr.gather_per_frame(idx))
}

/// Landmark names of one hand
#[derive(Debug, Clone)]
pub struct HandLandmarks {
    pub joint_names: Vec<String>,
    pub tip_names: Vec<String>,
}

impl HandLandmarks {
    pub fn for_side(side: Handedness) -> Self {
        Self {
            joint_names: HAND_JOINTS.iter().map(|j| format!("{}{j}", side.joint_prefix())).collect(),
            tip_names: HAND_TIPS.iter().map(|t| format!("{}{t}", side.tip_prefix())).collect(),
        }
    }
}

/// Resolved joint and fingertip rows of one hand
#[derive(Debug, Clone, Default)]
pub struct HandIndices {
    pub joints: Vec<usize>,
    pub tips: Vec<usize>,
}

/// Hand landmark rows of both sides, resolved once against a table before the
/// run starts so a missing name stops the run instead of failing every sequence
#[derive(Debug, Clone, Default)]
pub struct HandSelectors {
    pub sides: EnumMap<Handedness, HandIndices>,
}

impl HandSelectors {
    pub fn resolve(table: &SemanticIndexTable) -> GrabResult<Self> {
        let mut sides: EnumMap<Handedness, HandIndices> = EnumMap::default();
        for side in Handedness::iter() {
            let names = HandLandmarks::for_side(side);
            sides[side] = HandIndices {
                joints: table.joint_indices(&names.joint_names)?,
                tips: table.vertex_indices(&names.tip_names)?,
            };
        }
        Ok(Self { sides })
    }

    pub fn joints(&self, side: Handedness, joints: &nd::Array3<f32>) -> GrabResult<nd::Array3<f32>> {
        select_rows(joints, &self.sides[side].joints, "joint")
    }

    pub fn tips(&self, side: Handedness, verts: &nd::Array3<f32>) -> GrabResult<nd::Array3<f32>> {
        select_rows(verts, &self.sides[side].tips, "vertex")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_follows_requested_order() {
        let table = SemanticIndexTable::new(&["pelvis", "index2", "wrist", "index1"], &[]);
        let joints = nd::Array3::from_shape_fn((2, 4, 3), |(t, j, c)| (t * 100 + j * 10 + c) as f32);
        let sel = table.select_joints(&joints, &["wrist", "index1", "index2"]).unwrap();
        assert_eq!(sel.dim(), (2, 3, 3));
        for t in 0..2 {
            assert_eq!(sel.slice(nd::s![t, 0, ..]), joints.slice(nd::s![t, 2, ..]));
            assert_eq!(sel.slice(nd::s![t, 1, ..]), joints.slice(nd::s![t, 3, ..]));
            assert_eq!(sel.slice(nd::s![t, 2, ..]), joints.slice(nd::s![t, 1, ..]));
        }
    }

    #[test]
    fn unknown_name_is_fatal() {
        let table = SemanticIndexTable::new(&["wrist"], &[("tip", 3)]);
        let err = table.joint_index("elbow").unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(table.vertex_index("nose"), Err(GrabError::UnknownLandmark { table: "vertex", .. })));
        assert_eq!(table.vertex_index("tip").unwrap(), 3);
    }

    #[test]
    fn smplx_table_resolves_both_hands() {
        let selectors = HandSelectors::resolve(&SemanticIndexTable::smplx()).unwrap();
        let left = &selectors.sides[Handedness::Left];
        let right = &selectors.sides[Handedness::Right];
        assert_eq!(left.joints.len(), 16);
        assert_eq!(left.joints[0], 20);
        assert_eq!(right.joints[0], 21);
        assert_eq!(right.tips, vec![8079, 7669, 7794, 7905, 8022]);
        assert_eq!(left.tips[0], 5361);
    }

    #[test]
    fn out_of_range_rows_are_rejected() {
        let table = SemanticIndexTable::new(&["a", "b"], &[("far", 100)]);
        let verts = nd::Array3::<f32>::zeros((1, 10, 3));
        assert!(table.select_vertices(&verts, &["far"]).is_err());
    }

    #[test]
    fn side_names_are_prefixed() {
        let right = HandLandmarks::for_side(Handedness::Right);
        assert_eq!(right.joint_names[0], "right_wrist");
        assert_eq!(right.tip_names[4], "rpinky");
    }
}
