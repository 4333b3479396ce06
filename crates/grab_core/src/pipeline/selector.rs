use super::layout::{ArtifactIndex, OutputLayout};
use crate::{
    codec::{
        artifact::{broadcast_text, ArtifactBundle},
        sequence::SequenceRecord,
    },
    common::{
        config::{GrabConfig, OutputOptions},
        error::{ErrorScope, GrabError, GrabResult},
        landmarks::{HandSelectors, SemanticIndexTable},
        template::TemplateCache,
        types::{Actor, Handedness, ModelKind, OutputKind},
    },
    models::{
        adapter::{hand_rotation_matrices, DeformOutput, DeformationAdapter, IdentityConfig, PoseParams},
        assets::{ModelAssets, ModelCache},
        context::ExecutionContext,
    },
};
use grab_utils::array::GatherRows;
use itertools::Itertools;
use log::{debug, info, warn};
use ndarray as nd;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{collections::BTreeMap, path::Path};
use strum::IntoEnumIterator;

/// Progress of one (sequence, kind) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KindState {
    Pending,
    /// The product exists and reprocessing is off
    Skipped,
    Computed,
    Written,
    Failed(String),
}

/// What happened to the enabled kinds of one sequence
#[derive(Debug, Clone, Default)]
pub struct SequenceReport {
    pub sequence: String,
    pub states: BTreeMap<OutputKind, KindState>,
    /// Whether the record had to be read at all
    pub loaded: bool,
    /// Set when the whole sequence was abandoned
    pub sequence_error: Option<String>,
}

impl SequenceReport {
    pub fn state(&self, kind: OutputKind) -> Option<&KindState> {
        self.states.get(&kind)
    }

    fn count(&self, pred: impl Fn(&KindState) -> bool) -> usize {
        self.states.values().filter(|s| pred(s)).count()
    }

    pub fn written(&self) -> usize {
        self.count(|s| *s == KindState::Written)
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| *s == KindState::Skipped)
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, KindState::Failed(_)))
    }
}

/// Draws ``requested`` distinct vertex ids out of ``available``
pub fn sample_vertex_ids<R: Rng + ?Sized>(rng: &mut R, available: usize, requested: usize) -> GrabResult<Vec<usize>> {
    if requested > available {
        return Err(GrabError::InvalidSampleCount { requested, available });
    }
    Ok(rand::seq::index::sample(rng, available, requested).into_vec())
}

/// 64 bit FNV-1a, stable across platforms and releases
fn stable_hash(text: &str) -> u64 {
    text.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, b| (hash ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3))
}

/// Generator of the object vertex draw of one sequence. With a seed the draw
/// only depends on the seed and the sequence path relative to the dataset root.
pub fn sequence_rng(seed: Option<u64>, relative_path: &Path) -> StdRng {
    match seed {
        Some(seed) => {
            let key = relative_path.components().map(|c| c.as_os_str().to_string_lossy()).join("/");
            StdRng::seed_from_u64(seed ^ stable_hash(&key))
        }
        None => StdRng::from_entropy(),
    }
}

/// Buffers that only live while one sequence is processed
struct SequenceScope {
    record: SequenceRecord,
    body: Option<DeformOutput>,
    templates: TemplateCache,
}

#[allow(clippy::cast_possible_wrap)]
fn metadata_bundle(record: &SequenceRecord) -> GrabResult<ArtifactBundle> {
    let nr_frames = record.n_frames;
    ArtifactBundle::new(OutputKind::Metadata, nr_frames)
        .with("obj_name", broadcast_text(&record.obj_name, nr_frames))?
        .with("sbj_id", broadcast_text(&record.sbj_id, nr_frames))?
        .with("n_comps", nd::Array1::from_elem(nr_frames, record.n_comps as i64))?
        .with("gender", broadcast_text(&record.gender.to_string(), nr_frames))?
        .with("intent", broadcast_text(&record.motion_intent, nr_frames))?
        .with("frame_nums", (0..nr_frames).map(|t| t as i64).collect::<nd::Array1<i64>>())
}

fn contact_bundle(record: &SequenceRecord) -> GrabResult<ArtifactBundle> {
    ArtifactBundle::new(OutputKind::Contact, record.n_frames)
        .with("object_contact_mask", record.contact.object_mask())?
        .with("object_contact", record.contact.object.clone())?
        .with("body_contact", record.contact.body.clone())
}

fn hand_param<'a>(record: &'a SequenceRecord, side: Handedness, name: &str) -> GrabResult<&'a nd::Array2<f32>> {
    let actor = Actor::hand(side);
    let values = record[actor]
        .param(name)
        .ok_or_else(|| GrabError::invalid_params("hand", format!("the {actor} block has no `{name}`")))?;
    if values.ncols() != 3 {
        return Err(GrabError::invalid_params("hand", format!("{actor} `{name}` has width {}, expected 3", values.ncols())));
    }
    Ok(values)
}

fn hand_joint_bundle(record: &SequenceRecord, body: &DeformOutput, selectors: &HandSelectors) -> GrabResult<ArtifactBundle> {
    let joints = body
        .joints
        .as_ref()
        .ok_or_else(|| GrabError::invalid_params("body", "the body evaluation has no joints"))?;
    let mut bundle = ArtifactBundle::new(OutputKind::HandJoints, record.n_frames);
    for side in Handedness::iter() {
        bundle.push(&format!("{}_tips", Actor::hand(side)), selectors.tips(side, &body.vertices)?)?;
    }
    for side in Handedness::iter() {
        bundle.push(&format!("{}_joints", Actor::hand(side)), selectors.joints(side, joints)?)?;
    }
    for side in Handedness::iter() {
        bundle.push(&format!("{}_trans", Actor::hand(side)), hand_param(record, side, "transl")?.clone())?;
    }
    // each side is rotated by its own orientation
    for side in Handedness::iter() {
        bundle.push(&format!("{}_rot", Actor::hand(side)), hand_rotation_matrices(hand_param(record, side, "global_orient")?))?;
    }
    Ok(bundle)
}

/// Runs the per kind state machine over sequences: skip what exists, compute
/// the rest in priority order, write each product in one step.
pub struct OutputWriter {
    options: OutputOptions,
    layout: OutputLayout,
    selectors: HandSelectors,
    adapter: DeformationAdapter,
}

impl OutputWriter {
    /// Landmarks are resolved here, an unknown name fails before any sequence
    pub fn new(config: &GrabConfig, adapter: DeformationAdapter, table: &SemanticIndexTable) -> GrabResult<Self> {
        let selectors = HandSelectors::resolve(table)?;
        Ok(Self {
            options: config.options.clone(),
            layout: OutputLayout::new(&config.grab_path, &config.out_path),
            selectors,
            adapter,
        })
    }

    /// Writer with the model files under ``config.model_path`` and the SMPL-X
    /// landmark table
    pub fn from_config(config: &GrabConfig) -> GrabResult<Self> {
        let ctx = ExecutionContext::with_threads(config.options.num_threads)?;
        let cache = ModelCache::new(ModelAssets::new(&config.model_path));
        Self::new(config, DeformationAdapter::new(ctx, cache), &SemanticIndexTable::smplx())
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    pub fn options(&self) -> &OutputOptions {
        &self.options
    }

    /// Model evaluations since the writer was created
    pub fn evaluations(&self) -> usize {
        self.adapter.evaluations()
    }

    /// Enabled kinds of a sequence and whether each still has to be produced
    pub fn plan(&self, index: &ArtifactIndex) -> BTreeMap<OutputKind, KindState> {
        OutputKind::iter()
            .filter(|kind| self.options.is_enabled(*kind))
            .map(|kind| {
                let state = if index.exists(kind) && !self.options.force_reprocess {
                    KindState::Skipped
                } else {
                    KindState::Pending
                };
                (kind, state)
            })
            .collect()
    }

    /// Processes one sequence. Only run fatal errors are returned, everything
    /// else ends up in the report.
    pub fn process(&mut self, record_path: &Path) -> GrabResult<SequenceReport> {
        let mut index = ArtifactIndex::scan(&self.layout, record_path);
        let mut report = SequenceReport {
            sequence: self.layout.relative(record_path).display().to_string(),
            states: self.plan(&index),
            ..SequenceReport::default()
        };
        for (kind, state) in &report.states {
            if *state == KindState::Skipped {
                info!("Results for {} already exist.", index.path(*kind).display());
            }
        }
        let pending: Vec<OutputKind> = report
            .states
            .iter()
            .filter(|(_, s)| **s == KindState::Pending)
            .map(|(k, _)| *k)
            .collect();
        if pending.is_empty() {
            return Ok(report);
        }

        info!("Processing data for {} split.", report.sequence);
        let record = match SequenceRecord::load(record_path) {
            Ok(record) => record,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("{}: cannot read the record: {e}", report.sequence);
                for kind in &pending {
                    report.states.insert(*kind, KindState::Failed(e.to_string()));
                }
                report.sequence_error = Some(e.to_string());
                return Ok(report);
            }
        };
        report.loaded = true;
        let mut scope = SequenceScope {
            record,
            body: None,
            templates: TemplateCache::new(),
        };

        for (i, kind) in pending.iter().copied().enumerate() {
            let result = self.compute(kind, &mut scope).and_then(|bundle| {
                report.states.insert(kind, KindState::Computed);
                bundle.save(index.path(kind))
            });
            match result {
                Ok(()) => {
                    index.mark_written(kind);
                    report.states.insert(kind, KindState::Written);
                    info!("{}: {kind} computed", report.sequence);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("{}: {kind} failed: {e}", report.sequence);
                    if e.scope() == ErrorScope::Sequence {
                        for rest in &pending[i..] {
                            report.states.insert(*rest, KindState::Failed(e.to_string()));
                        }
                        report.sequence_error = Some(e.to_string());
                        break;
                    }
                    report.states.insert(kind, KindState::Failed(e.to_string()));
                }
            }
        }
        debug!("{}: releasing sequence buffers", report.sequence);
        drop(scope);
        Ok(report)
    }

    fn compute(&mut self, kind: OutputKind, scope: &mut SequenceScope) -> GrabResult<ArtifactBundle> {
        let SequenceScope { record, body, templates } = scope;
        match kind {
            OutputKind::Metadata => metadata_bundle(record),
            OutputKind::BodyVerts => {
                let body = self.body_output(record, templates, body)?;
                ArtifactBundle::new(kind, record.n_frames).with("verts_body", body.vertices.clone())
            }
            OutputKind::HandJoints => {
                let body = self.body_output(record, templates, body)?;
                hand_joint_bundle(record, body, &self.selectors)
            }
            OutputKind::Contact => contact_bundle(record),
            OutputKind::LeftHandVerts => self.hand_verts(record, templates, Handedness::Left),
            OutputKind::RightHandVerts => self.hand_verts(record, templates, Handedness::Right),
            OutputKind::ObjectVerts => self.object_verts(record, templates),
        }
    }

    /// One body evaluation per sequence, shared by the kinds that need it
    fn body_output<'s>(
        &mut self,
        record: &SequenceRecord,
        templates: &mut TemplateCache,
        memo: &'s mut Option<DeformOutput>,
    ) -> GrabResult<&'s DeformOutput> {
        let output = match memo.take() {
            Some(output) => output,
            None => {
                let template = templates.get(&record.template_path(self.layout.grab_path(), Actor::Body))?;
                let identity = IdentityConfig::body(record.gender, record.n_comps);
                self.adapter
                    .evaluate(ModelKind::Body, &template.verts, &identity, &record[Actor::Body].params, record.n_frames)?
            }
        };
        Ok(memo.insert(output))
    }

    fn hand_verts(&mut self, record: &SequenceRecord, templates: &mut TemplateCache, side: Handedness) -> GrabResult<ArtifactBundle> {
        let actor = Actor::hand(side);
        let template = templates.get(&record.template_path(self.layout.grab_path(), actor))?;
        let identity = IdentityConfig::hand(side, record.n_comps);
        let output = self
            .adapter
            .evaluate(ModelKind::Hand, &template.verts, &identity, &record[actor].params, record.n_frames)?;
        // same key as the body product, readers of these files expect it
        ArtifactBundle::new(OutputKind::hand_verts(side), record.n_frames).with("verts_body", output.vertices)
    }

    fn object_verts(&mut self, record: &SequenceRecord, templates: &mut TemplateCache) -> GrabResult<ArtifactBundle> {
        let template = templates.get(&record.template_path(self.layout.grab_path(), Actor::Object))?;
        let mut rng = sequence_rng(self.options.sample_seed, self.layout.relative(&record.path));
        let sample_ids = sample_vertex_ids(&mut rng, template.num_verts(), self.options.n_verts_sample)?;
        let sampled = template.verts.gather_rows(&sample_ids);
        let params: &PoseParams = &record[Actor::Object].params;
        let output = self
            .adapter
            .evaluate(ModelKind::Object, &sampled, &IdentityConfig::Rigid, params, record.n_frames)?;
        ArtifactBundle::new(OutputKind::ObjectVerts, record.n_frames).with("verts_object", output.vertices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;
    use std::collections::HashSet;

    #[test]
    fn too_many_samples_is_an_error() {
        let mut rng = StepRng::new(0, 1);
        let err = sample_vertex_ids(&mut rng, 10, 11).unwrap_err();
        assert!(matches!(err, GrabError::InvalidSampleCount { requested: 11, available: 10 }));
    }

    #[test]
    fn samples_are_distinct() {
        let mut rng = StdRng::seed_from_u64(7);
        let ids = sample_vertex_ids(&mut rng, 50, 50).unwrap();
        assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 50);
        let ids = sample_vertex_ids(&mut rng, 1000, 64).unwrap();
        assert_eq!(ids.len(), 64);
        assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 64);
        assert!(ids.iter().all(|&i| i < 1000));
    }

    #[test]
    fn seeded_draws_depend_on_the_sequence() {
        let draw = |seed, path: &str| sample_vertex_ids(&mut sequence_rng(seed, Path::new(path)), 500, 16).unwrap();
        assert_eq!(draw(Some(3), "s1/apple_eat_1.npz"), draw(Some(3), "s1/apple_eat_1.npz"));
        assert_ne!(draw(Some(3), "s1/apple_eat_1.npz"), draw(Some(3), "s2/apple_eat_1.npz"));
        assert_ne!(draw(Some(3), "s1/apple_eat_1.npz"), draw(Some(4), "s1/apple_eat_1.npz"));
    }

    #[test]
    fn fnv_reference_values() {
        assert_eq!(stable_hash(""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(stable_hash("a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn report_counts() {
        let mut report = SequenceReport::default();
        report.states.insert(OutputKind::Metadata, KindState::Written);
        report.states.insert(OutputKind::BodyVerts, KindState::Skipped);
        report.states.insert(OutputKind::Contact, KindState::Failed("disk full".into()));
        assert_eq!((report.written(), report.skipped(), report.failed()), (1, 1, 1));
    }
}
