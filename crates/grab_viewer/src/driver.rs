use crate::{
    mesh::{colors, points_to_spheres, ColoredMesh},
    viewer::MeshViewer,
};
use grab_core::{
    codec::sequence::SequenceRecord,
    common::{
        config::OutputOptions,
        error::{GrabError, GrabResult},
        landmarks::{HandSelectors, SemanticIndexTable},
        template::TemplateMesh,
        types::{Actor, Handedness, ModelKind, OutputKind},
    },
    models::{
        adapter::{DeformOutput, DeformationAdapter, IdentityConfig},
        assets::{ModelAssets, ModelCache},
        context::ExecutionContext,
    },
    pipeline::batch::find_sequences,
};
use grab_utils::{
    io::NpyArray,
    numerical::euler,
    vector::{isometry_matrix, Matrix4f, Vector3f},
};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use ndarray as nd;
use rand::{rngs::StdRng, seq::index::sample, Rng, SeedableRng};
use std::path::{Path, PathBuf};

pub const JOINT_SPHERE_RADIUS: f32 = 0.004;

/// Settings of a visualization session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisualizeConfig {
    pub grab_path: PathBuf,
    pub model_path: PathBuf,
    /// Show the right hand with its joints instead of the full body
    pub rhand_only: bool,
    /// Part of the record file name a sequence must contain
    pub filter: String,
    pub sample_size: usize,
    pub frame_stride: usize,
    pub seed: Option<u64>,
    pub num_threads: Option<usize>,
}

impl VisualizeConfig {
    pub fn new(grab_path: PathBuf, model_path: PathBuf) -> Self {
        Self {
            grab_path,
            model_path,
            rhand_only: false,
            filter: "eat".to_string(),
            sample_size: 10,
            frame_stride: 4,
            seed: None,
            num_threads: None,
        }
    }

    pub fn validate(&self) -> GrabResult<()> {
        if !self.grab_path.is_dir() {
            return Err(GrabError::Config(format!("dataset path {} is not a directory", self.grab_path.display())));
        }
        if self.frame_stride == 0 {
            return Err(GrabError::Config("frame_stride must be positive".to_string()));
        }
        let mut needed = vec![OutputKind::BodyVerts];
        if self.rhand_only {
            needed.push(OutputKind::RightHandVerts);
        }
        ModelAssets::new(&self.model_path).validate(&OutputOptions::only(&needed))
    }
}

/// Fixed camera of every session, looking at the table from the front
pub fn default_camera_pose() -> Matrix4f {
    isometry_matrix(&euler([80.0, -15.0, 0.0], "xzx"), &Vector3f::new(-0.5, -4.0, 1.5))
}

/// Records whose file name contains ``filter``
pub fn matching_sequences(grab_path: &Path, filter: &str) -> Vec<PathBuf> {
    find_sequences(grab_path)
        .into_iter()
        .filter(|p| p.file_name().is_some_and(|n| n.to_string_lossy().contains(filter)))
        .collect()
}

/// Draws ``sample_size`` distinct sequences, all of them when fewer match
pub fn choose_sequences<R: Rng + ?Sized>(rng: &mut R, sequences: &[PathBuf], sample_size: usize) -> Vec<PathBuf> {
    let amount = if sample_size > sequences.len() {
        warn!("only {} sequences match, showing all of them instead of {sample_size}", sequences.len());
        sequences.len()
    } else {
        sample_size
    };
    sample(rng, sequences.len(), amount).into_iter().map(|i| sequences[i].clone()).collect()
}

/// Per vertex contact flags of one frame
fn contact_mask(contact: &NpyArray, frame: usize) -> nd::Array1<bool> {
    let values = contact.to_f32();
    if frame >= values.shape().first().copied().unwrap_or(0) {
        return nd::Array1::default(0);
    }
    values.index_axis(nd::Axis(0), frame).iter().map(|&v| v > 0.0).collect()
}

/// Everything drawn for one sequence, evaluated for all frames up front
#[derive(Debug)]
pub struct SequenceGeometry {
    pub body: DeformOutput,
    pub body_faces: nd::Array2<u32>,
    /// Right hand mesh and its 21 landmarks, hand mode only
    pub rhand: Option<(DeformOutput, nd::Array2<u32>, nd::Array3<f32>)>,
    pub object: DeformOutput,
    pub object_faces: nd::Array2<u32>,
    pub table: DeformOutput,
    pub table_faces: nd::Array2<u32>,
}

impl SequenceGeometry {
    /// The static scene of one frame
    pub fn scene(&self, record: &SequenceRecord, frame: usize) -> Vec<ColoredMesh> {
        let mut meshes = Vec::with_capacity(4);

        let mut object = ColoredMesh::new(
            "object",
            self.object.vertices.index_axis(nd::Axis(0), frame).to_owned(),
            self.object_faces.clone(),
            colors::YELLOW,
        );
        object.set_vertex_colors(colors::RED, contact_mask(&record.contact.object, frame).view());
        meshes.push(object);

        meshes.push(ColoredMesh::new(
            "table",
            self.table.vertices.index_axis(nd::Axis(0), frame).to_owned(),
            self.table_faces.clone(),
            colors::WHITE,
        ));

        match &self.rhand {
            Some((hand, faces, landmarks)) => {
                let verts = hand.vertices.index_axis(nd::Axis(0), frame).to_owned();
                meshes.push(ColoredMesh::new("rhand", verts, faces.clone(), colors::SKIN).wireframe());
                meshes.push(points_to_spheres(
                    "rhand_joints",
                    landmarks.index_axis(nd::Axis(0), frame),
                    JOINT_SPHERE_RADIUS,
                    colors::GREEN,
                ));
            }
            None => {
                let verts = self.body.vertices.index_axis(nd::Axis(0), frame).to_owned();
                let mut body = ColoredMesh::new("body", verts, self.body_faces.clone(), colors::SKIN).smooth();
                body.set_vertex_colors(colors::RED, contact_mask(&record.contact.body, frame).view());
                meshes.push(body);
            }
        }
        meshes
    }
}

/// Plays sampled sequences into one viewer session
pub struct Visualizer {
    config: VisualizeConfig,
    adapter: DeformationAdapter,
    selectors: HandSelectors,
    show_progress: bool,
}

impl Visualizer {
    pub fn new(config: VisualizeConfig) -> GrabResult<Self> {
        config.validate()?;
        let ctx = ExecutionContext::with_threads(config.num_threads)?;
        let adapter = DeformationAdapter::new(ctx, ModelCache::new(ModelAssets::new(&config.model_path)));
        Self::with_adapter(config, adapter, &SemanticIndexTable::smplx())
    }

    pub fn with_adapter(config: VisualizeConfig, adapter: DeformationAdapter, table: &SemanticIndexTable) -> GrabResult<Self> {
        Ok(Self {
            selectors: HandSelectors::resolve(table)?,
            config,
            adapter,
            show_progress: true,
        })
    }

    #[must_use]
    pub fn show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn config(&self) -> &VisualizeConfig {
        &self.config
    }

    pub fn evaluations(&self) -> usize {
        self.adapter.evaluations()
    }

    fn evaluate(&mut self, record: &SequenceRecord, actor: Actor) -> GrabResult<(DeformOutput, nd::Array2<u32>)> {
        let template = TemplateMesh::load(&record.template_path(&self.config.grab_path, actor))?;
        let (kind, identity) = match actor {
            Actor::Body => (ModelKind::Body, IdentityConfig::body(record.gender, record.n_comps)),
            Actor::LeftHand => (ModelKind::Hand, IdentityConfig::hand(Handedness::Left, record.n_comps)),
            Actor::RightHand => (ModelKind::Hand, IdentityConfig::hand(Handedness::Right, record.n_comps)),
            Actor::Object | Actor::Table => (ModelKind::Object, IdentityConfig::Rigid),
        };
        let output = self
            .adapter
            .evaluate(kind, &template.verts, &identity, &record[actor].params, record.n_frames)?;
        Ok((output, template.faces))
    }

    /// Evaluates every model a scene of ``record`` needs
    pub fn geometry(&mut self, record: &SequenceRecord) -> GrabResult<SequenceGeometry> {
        let (body, body_faces) = self.evaluate(record, Actor::Body)?;
        let rhand = if self.config.rhand_only {
            let (hand, faces) = self.evaluate(record, Actor::RightHand)?;
            let joints = body
                .joints
                .as_ref()
                .ok_or_else(|| GrabError::invalid_params("smplx", "body evaluation returned no joints"))?;
            let hand_joints = self.selectors.joints(Handedness::Right, joints)?;
            let tips = self.selectors.tips(Handedness::Right, &body.vertices)?;
            let landmarks = nd::concatenate(nd::Axis(1), &[hand_joints.view(), tips.view()])
                .map_err(|e| GrabError::invalid_params("smplx", e.to_string()))?;
            Some((hand, faces, landmarks))
        } else {
            None
        };
        let (object, object_faces) = self.evaluate(record, Actor::Object)?;
        let (table, table_faces) = self.evaluate(record, Actor::Table)?;
        Ok(SequenceGeometry {
            body,
            body_faces,
            rhand,
            object,
            object_faces,
            table,
            table_faces,
        })
    }

    /// Shows every ``frame_stride``-th frame of one sequence, returns the
    /// number of scenes handed to the viewer
    pub fn visualize_sequence<V: MeshViewer + ?Sized>(&mut self, path: &Path, viewer: &mut V) -> GrabResult<usize> {
        let record = SequenceRecord::load(path)?;
        let geometry = self.geometry(&record)?;
        let mut nr_scenes = 0;
        for frame in (0..record.n_frames).step_by(self.config.frame_stride) {
            viewer.set_static_meshes(&geometry.scene(&record, frame))?;
            nr_scenes += 1;
        }
        info!("{}: {} of {} frames shown", record.sequence_id(), nr_scenes, record.n_frames);
        Ok(nr_scenes)
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len as u64);
        let style = ProgressStyle::default_bar()
            .template("{msg:.bold.cyan} [{bar:30.cyan/blue}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        bar.set_style(style);
        bar.set_message("sequences");
        bar
    }

    /// Samples the matching sequences and plays them one after the other into
    /// ``viewer``. A sequence that cannot be shown is logged and skipped.
    pub fn run<V: MeshViewer + ?Sized>(&mut self, viewer: &mut V) -> GrabResult<usize> {
        let matching = matching_sequences(&self.config.grab_path, &self.config.filter);
        info!("{} sequences match `{}`", matching.len(), self.config.filter);
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let chosen = choose_sequences(&mut rng, &matching, self.config.sample_size);

        viewer.set_camera_pose(&default_camera_pose())?;
        let bar = self.progress_bar(chosen.len());
        let mut nr_scenes = 0;
        for path in &chosen {
            match self.visualize_sequence(path, viewer) {
                Ok(n) => nr_scenes += n,
                Err(e) if e.is_fatal() => {
                    bar.abandon();
                    return Err(e);
                }
                Err(e) => warn!("cannot show {}: {e}", path.display()),
            }
            bar.inc(1);
        }
        bar.finish();
        viewer.close()?;
        Ok(nr_scenes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn camera_looks_from_the_front() {
        let pose = default_camera_pose();
        assert_relative_eq!(pose[(0, 3)], -0.5);
        assert_relative_eq!(pose[(1, 3)], -4.0);
        assert_relative_eq!(pose[(2, 3)], 1.5);
        let rot = pose.fixed_view::<3, 3>(0, 0).into_owned();
        assert_relative_eq!(rot.determinant(), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn sample_is_clamped_to_matches() {
        let sequences: Vec<PathBuf> = (0..3).map(|i| PathBuf::from(format!("s1/cup_eat_{i}.npz"))).collect();
        let mut rng = StdRng::seed_from_u64(3);
        let mut chosen = choose_sequences(&mut rng, &sequences, 10);
        chosen.sort();
        assert_eq!(chosen, sequences);
        assert_eq!(choose_sequences(&mut rng, &sequences, 2).len(), 2);
        assert!(choose_sequences(&mut rng, &[], 10).is_empty());
    }

    #[test]
    fn contact_mask_of_frame() {
        let contact = NpyArray::from(nd::arr2(&[[0_i8, 3, 0], [1, 0, 0]]));
        assert_eq!(contact_mask(&contact, 0), nd::arr1(&[false, true, false]));
        assert_eq!(contact_mask(&contact, 1), nd::arr1(&[true, false, false]));
        assert!(contact_mask(&contact, 5).is_empty());
    }

    #[test]
    fn name_filter() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("s1")).unwrap();
        for name in ["apple_eat_1.npz", "apple_pass_1.npz", "cup_eat_1_verts_body.npz"] {
            std::fs::write(dir.path().join("s1").join(name), b"").unwrap();
        }
        assert_eq!(matching_sequences(dir.path(), "eat"), vec![dir.path().join("s1/apple_eat_1.npz")]);
    }
}
