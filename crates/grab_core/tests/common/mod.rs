#![allow(dead_code)]

use enum_map::EnumMap;
use grab_core::{
    codec::sequence::{ActorBlock, ContactBlock, SequenceRecord},
    common::{
        config::{GrabConfig, OutputOptions},
        landmarks::SemanticIndexTable,
        template::TemplateMesh,
        types::{Actor, Gender},
    },
    models::{
        adapter::DeformationAdapter,
        assets::{ModelAssets, ModelCache},
        context::ExecutionContext,
        smpl_x,
    },
    pipeline::selector::OutputWriter,
};
use grab_utils::io::{list_files, FileType, NpyArray};
use ndarray as nd;
use ndarray_npy::NpzWriter;
use std::{
    fs::File,
    path::{Path, PathBuf},
};
use tempfile::TempDir;

pub const BODY_VERTS: usize = 8;
pub const HAND_VERTS: usize = 12;
pub const OBJECT_VERTS: usize = 40;
pub const N_COMPS: usize = 6;

const SMPLX_JOINTS: usize = 55;
const MANO_JOINTS: usize = 16;

/// Writes a skinning model with the array names of the SMPL-X and MANO files
fn write_model(path: &Path, nr_verts: usize, nr_joints: usize, hand_suffixes: &[&str]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut npz = NpzWriter::new_compressed(File::create(path).unwrap());
    let verts = nd::Array2::from_shape_fn((nr_verts, 3), |(v, c)| if c == v % 3 { 0.05 * (v + 1) as f32 } else { 0.01 * c as f32 });
    let faces = nd::Array2::from_shape_fn((nr_verts - 2, 3), |(f, k)| (f + k) as i64);
    let mut regressor = nd::Array2::<f64>::zeros((nr_joints, nr_verts));
    for j in 0..nr_joints {
        regressor[[j, j % nr_verts]] = 1.0;
    }
    let mut weights = nd::Array2::<f64>::zeros((nr_verts, nr_joints));
    for v in 0..nr_verts {
        weights[[v, v % nr_joints]] = 1.0;
    }
    let mut kintree = nd::Array2::<i64>::zeros((2, nr_joints));
    for j in 0..nr_joints {
        kintree[[0, j]] = j as i64 - 1;
        kintree[[1, j]] = j as i64;
    }
    npz.add_array("v_template", &verts.mapv(f64::from)).unwrap();
    npz.add_array("f", &faces).unwrap();
    npz.add_array("shapedirs", &nd::Array3::<f64>::from_elem((nr_verts, 3, 10), 0.001)).unwrap();
    npz.add_array("posedirs", &nd::Array3::<f64>::from_elem((nr_verts, 3, (nr_joints - 1) * 9), 0.0005)).unwrap();
    npz.add_array("J_regressor", &regressor).unwrap();
    npz.add_array("kintree_table", &kintree).unwrap();
    npz.add_array("weights", &weights).unwrap();
    let components = nd::Array2::<f64>::from_shape_fn((45, 45), |(r, c)| if r == c { 1.0 } else { 0.0 });
    for suffix in hand_suffixes {
        npz.add_array(format!("hands_components{suffix}"), &components).unwrap();
        npz.add_array(format!("hands_mean{suffix}"), &nd::Array1::<f64>::from_elem(45, 0.02)).unwrap();
    }
    npz.finish().unwrap();
}

fn model_template(nr_verts: usize) -> TemplateMesh {
    let verts = nd::Array2::from_shape_fn((nr_verts, 3), |(v, c)| if c == v % 3 { 0.05 * (v + 1) as f32 } else { 0.01 * c as f32 });
    let faces = nd::Array2::from_shape_fn((nr_verts - 2, 3), |(f, k)| (f + k) as u32);
    TemplateMesh::new(verts, faces)
}

fn object_template(nr_verts: usize) -> TemplateMesh {
    let verts = nd::Array2::from_shape_fn((nr_verts, 3), |(v, c)| ((v * 7 + c * 3) % 11) as f32 * 0.01);
    let faces = nd::Array2::from_shape_fn((nr_verts - 2, 3), |(f, k)| (f + k) as u32);
    TemplateMesh::new(verts, faces)
}

/// SMPL-X joint names with fingertips on vertices of the tiny body
pub fn landmark_table() -> SemanticIndexTable {
    let tips: Vec<(String, usize)> = ["thumb", "index", "middle", "ring", "pinky"]
        .iter()
        .enumerate()
        .flat_map(|(i, t)| [(format!("l{t}"), i), (format!("r{t}"), i + 3)])
        .collect();
    SemanticIndexTable::new(&smpl_x::JOINT_NAMES.map(String::from), &tips)
}

/// A scratch dataset ``<root>/grab/<category>/<seq>.npz`` with templates under
/// ``<root>/tools`` and models under ``<root>/models``
pub struct Fixture {
    pub dir: TempDir,
    pub grab_path: PathBuf,
    pub out_path: PathBuf,
    pub model_path: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let grab_path = root.join("grab");
        let out_path = root.join("out");
        let model_path = root.join("models");
        std::fs::create_dir_all(&grab_path).unwrap();

        write_model(&model_path.join("smplx/SMPLX_MALE.npz"), BODY_VERTS, SMPLX_JOINTS, &["l", "r"]);
        write_model(&model_path.join("mano/MANO_LEFT.npz"), HAND_VERTS, MANO_JOINTS, &[""]);
        write_model(&model_path.join("mano/MANO_RIGHT.npz"), HAND_VERTS, MANO_JOINTS, &[""]);

        std::fs::create_dir_all(root.join("tools/subject_meshes/male")).unwrap();
        std::fs::create_dir_all(root.join("tools/object_meshes")).unwrap();
        model_template(BODY_VERTS).save_ply(&root.join("tools/subject_meshes/male/s1.ply")).unwrap();
        model_template(HAND_VERTS).save_ply(&root.join("tools/subject_meshes/male/s1_lhand.ply")).unwrap();
        model_template(HAND_VERTS).save_ply(&root.join("tools/subject_meshes/male/s1_rhand.ply")).unwrap();
        object_template(OBJECT_VERTS).save_ply(&root.join("tools/object_meshes/apple.ply")).unwrap();
        object_template(6).save_ply(&root.join("tools/object_meshes/table.ply")).unwrap();

        Self {
            dir,
            grab_path,
            out_path,
            model_path,
        }
    }

    /// A male T frame record, the object is in contact on odd frames
    pub fn record(&self, category: &str, name: &str, n_frames: usize) -> SequenceRecord {
        let path = self.grab_path.join(category).join(format!("{name}.npz"));
        let wave = |t: usize, i: usize| ((t * 5 + i) as f32 * 0.31).sin() * 0.2;
        let frames = |width: usize| nd::Array2::from_shape_fn((n_frames, width), |(t, i)| wave(t, i));

        let mut actors: EnumMap<Actor, ActorBlock> = EnumMap::default();
        actors[Actor::Body].template = "tools/subject_meshes/male/s1.ply".into();
        actors[Actor::LeftHand].template = "tools/subject_meshes/male/s1_lhand.ply".into();
        actors[Actor::RightHand].template = "tools/subject_meshes/male/s1_rhand.ply".into();
        actors[Actor::Object].template = "tools/object_meshes/apple.ply".into();
        actors[Actor::Table].template = "tools/object_meshes/table.ply".into();
        for (name, width) in [("global_orient", 3), ("body_pose", 63), ("transl", 3), ("left_hand_pose", N_COMPS), ("right_hand_pose", N_COMPS)] {
            actors[Actor::Body].params.insert(name.into(), frames(width));
        }
        for actor in [Actor::LeftHand, Actor::RightHand] {
            for (name, width) in [("global_orient", 3), ("hand_pose", N_COMPS), ("transl", 3)] {
                actors[actor].params.insert(name.into(), frames(width));
            }
        }
        // different orientations for the two hands
        actors[Actor::RightHand].params.insert("global_orient".into(), frames(3).mapv(|x| -2.0 * x + 0.3));
        for actor in [Actor::Object, Actor::Table] {
            actors[actor].params.insert("global_orient".into(), frames(3));
            actors[actor].params.insert("transl".into(), frames(3));
        }

        SequenceRecord {
            path,
            n_frames,
            gender: Gender::Male,
            sbj_id: "s1".into(),
            obj_name: "apple".into(),
            motion_intent: "eat".into(),
            n_comps: N_COMPS,
            framerate: Some(120.0),
            actors,
            contact: ContactBlock {
                object: NpyArray::from(nd::Array2::from_shape_fn((n_frames, 1), |(t, _)| (t % 2) as i8)),
                body: NpyArray::from(nd::Array2::<i8>::zeros((n_frames, BODY_VERTS))),
            },
        }
    }

    /// Writes a record into the dataset and returns its path
    pub fn add(&self, record: &SequenceRecord) -> PathBuf {
        std::fs::create_dir_all(record.path.parent().unwrap()).unwrap();
        record.to_file(&record.path).unwrap();
        record.path.clone()
    }

    pub fn config(&self, options: OutputOptions) -> GrabConfig {
        GrabConfig::new(self.grab_path.clone(), Some(self.out_path.clone()), self.model_path.clone(), options)
    }

    pub fn adapter(&self) -> DeformationAdapter {
        DeformationAdapter::new(ExecutionContext::sequential(), ModelCache::new(ModelAssets::new(&self.model_path)))
    }

    /// Writer with fingertips mapped to vertices of the tiny body
    pub fn writer(&self, config: &GrabConfig) -> OutputWriter {
        OutputWriter::new(config, self.adapter(), &landmark_table()).unwrap()
    }

    /// Product files under the output root, relative and sorted
    pub fn products(&self) -> Vec<String> {
        list_files(&self.out_path, 2, FileType::Npz)
            .into_iter()
            .map(|p| p.strip_prefix(&self.out_path).unwrap().display().to_string())
            .collect()
    }
}
