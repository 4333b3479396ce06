//! Sequence records in a flattened npz layout: scalars and text at the top
//! level, actor blocks as `<actor>/<template key>` and `<actor>/params/<name>`,
//! contact labels as `contact/object` and `contact/body`.
//!
//! The records GRAB ships store each actor as a pickled dict inside an object
//! array. Those are not read here and fail as corrupt, they have to be
//! flattened into this layout first.

use crate::{
    common::{
        error::{GrabError, GrabResult},
        template::resolve_template,
        types::{Actor, Gender},
    },
    models::adapter::PoseParams,
};
use enum_map::EnumMap;
use grab_utils::io::{string_to_array, NpyArray, NpzArchive};
use log::debug;
use ndarray as nd;
use ndarray_npy::NpzWriter;
use std::{
    fs::File,
    io::{Read, Seek},
    ops::Index,
    path::{Path, PathBuf},
    str::FromStr,
};
use strum::IntoEnumIterator;

/// One actor of a sequence: the template it is bound to and its per frame
/// parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActorBlock {
    /// Template path relative to the parent of the dataset root
    pub template: String,
    pub params: PoseParams,
}

impl ActorBlock {
    pub fn param(&self, name: &str) -> Option<&nd::Array2<f32>> {
        self.params.get(name)
    }
}

/// Per frame contact labels, kept with the dtype they were recorded with
#[derive(Debug, Clone, PartialEq)]
pub struct ContactBlock {
    /// [T, n_object_verts]
    pub object: NpyArray,
    /// [T, n_body_verts]
    pub body: NpyArray,
}

impl ContactBlock {
    /// True for every frame where any object vertex is in contact
    pub fn object_mask(&self) -> nd::Array1<bool> {
        let values = self.object.to_f32();
        values.outer_iter().map(|frame| frame.iter().any(|&v| v > 0.0)).collect()
    }
}

/// A borrowed view on one entry of a record, see [`SequenceRecord::get`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecordField<'a> {
    Count(usize),
    Scalar(f32),
    Gender(Gender),
    Text(&'a str),
    Params(&'a nd::Array2<f32>),
    Raw(&'a NpyArray),
}

/// Everything recorded for one sequence. All per frame arrays have ``n_frames``
/// rows.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceRecord {
    pub path: PathBuf,
    pub n_frames: usize,
    pub gender: Gender,
    pub sbj_id: String,
    pub obj_name: String,
    pub motion_intent: String,
    /// Number of PCA components of the hand poses
    pub n_comps: usize,
    pub framerate: Option<f32>,
    pub actors: EnumMap<Actor, ActorBlock>,
    pub contact: ContactBlock,
}

impl Index<Actor> for SequenceRecord {
    type Output = ActorBlock;
    fn index(&self, actor: Actor) -> &ActorBlock {
        &self.actors[actor]
    }
}

fn require_key<R: Read + Seek>(npz: &NpzArchive<R>, key: &str, path: &Path) -> GrabResult<()> {
    if npz.contains(key) {
        Ok(())
    } else {
        Err(GrabError::corrupt(path, format!("missing `{key}`")))
    }
}

/// Per frame arrays are stored [T, ...] and used as [T, D]
fn as_frames(values: nd::ArrayD<f32>) -> Option<nd::Array2<f32>> {
    let shape = values.shape().to_vec();
    let (&nr_frames, rest) = shape.split_first()?;
    let width = rest.iter().product::<usize>();
    values.as_standard_layout().into_owned().into_shape_with_order((nr_frames, width)).ok()
}

impl SequenceRecord {
    /// Reads a record. Fails with ``NotFound`` when there is no file and with
    /// ``CorruptRecord`` when anything required is missing or inconsistent.
    pub fn load(path: &Path) -> GrabResult<Self> {
        let mut npz = NpzArchive::open(path).map_err(|e| GrabError::from_record(path, e))?;
        let record = Self::from_archive(&mut npz, path)?;
        debug!("loaded {} with {} frames", path.display(), record.n_frames);
        Ok(record)
    }

    pub fn from_archive<R: Read + Seek>(npz: &mut NpzArchive<R>, path: &Path) -> GrabResult<Self> {
        let corrupt = |reason: String| GrabError::corrupt(path, reason);
        let require = |npz: &NpzArchive<R>, key: &str| require_key(npz, key, path);

        if let Some(actor) = Actor::iter().find(|a| npz.contains(a.key())) {
            return Err(corrupt(format!(
                "`{}` is a pickled object array, only flattened `{}/...` arrays are read",
                actor.key(),
                actor.key()
            )));
        }

        require(&*npz, "n_frames")?;
        let n_frames = npz.read_usize("n_frames").map_err(|e| GrabError::from_record(path, e))?;
        if n_frames == 0 {
            return Err(corrupt("record has no frames".to_string()));
        }

        require(&*npz, "gender")?;
        let gender_text = npz.read_string("gender").map_err(|e| GrabError::from_record(path, e))?;
        let gender = Gender::from_str(gender_text.trim()).map_err(|_| corrupt(format!("unknown gender `{gender_text}`")))?;

        let text = |npz: &mut NpzArchive<R>, key: &str, required: bool| -> GrabResult<String> {
            if !npz.contains(key) && !required {
                return Ok(String::new());
            }
            require(&*npz, key)?;
            npz.read_string(key).map_err(|e| GrabError::from_record(path, e))
        };
        let sbj_id = text(npz, "sbj_id", true)?;
        let obj_name = text(npz, "obj_name", true)?;
        let motion_intent = text(npz, "motion_intent", false)?;

        let framerate = if npz.contains("framerate") {
            Some(npz.read_scalar_f32("framerate").map_err(|e| GrabError::from_record(path, e))?)
        } else {
            None
        };

        let names: Vec<String> = npz.names().map(str::to_string).collect();
        let mut actors: EnumMap<Actor, ActorBlock> = EnumMap::default();
        for actor in Actor::iter() {
            let prefix = format!("{}/", actor.key());
            if !names.iter().any(|n| n.starts_with(&prefix)) {
                return Err(corrupt(format!("missing the {actor} block")));
            }
            let template_key = format!("{prefix}{}", actor.template_key());
            require(&*npz, &template_key)?;
            let block = &mut actors[actor];
            block.template = npz.read_string(&template_key).map_err(|e| GrabError::from_record(path, e))?;

            let params_prefix = format!("{prefix}params/");
            for key in names.iter().filter(|n| n.starts_with(&params_prefix)) {
                let values = npz.read_raw(key).map_err(|e| GrabError::from_record(path, e))?.to_f32();
                let frames = as_frames(values).ok_or_else(|| corrupt(format!("`{key}` is a scalar, expected per frame values")))?;
                if frames.nrows() != n_frames {
                    return Err(corrupt(format!("`{key}` has {} frames, expected {n_frames}", frames.nrows())));
                }
                block.params.insert(key[params_prefix.len()..].to_string(), frames);
            }
        }

        let n_comps = if npz.contains("n_comps") {
            npz.read_usize("n_comps").map_err(|e| GrabError::from_record(path, e))?
        } else {
            actors[Actor::Body]
                .param("left_hand_pose")
                .map(|p| p.ncols())
                .ok_or_else(|| corrupt("missing `n_comps`".to_string()))?
        };

        let mut contact_array = |key: &str| -> GrabResult<NpyArray> {
            require(&*npz, key)?;
            let values = npz.read_raw(key).map_err(|e| GrabError::from_record(path, e))?;
            if values.shape().is_empty() || values.leading_dim() != n_frames {
                return Err(corrupt(format!("`{key}` has shape {:?}, expected {n_frames} frames", values.shape())));
            }
            Ok(values)
        };
        let contact = ContactBlock {
            object: contact_array("contact/object")?,
            body: contact_array("contact/body")?,
        };

        Ok(Self {
            path: path.to_path_buf(),
            n_frames,
            gender,
            sbj_id,
            obj_name,
            motion_intent,
            n_comps,
            framerate,
            actors,
            contact,
        })
    }

    /// Writes the record in the layout [`Self::load`] reads
    pub fn to_file(&self, path: &Path) -> GrabResult<()> {
        let persist = |reason: String| GrabError::Persistence {
            path: path.to_path_buf(),
            reason,
        };
        let file = File::create(path)?;
        let mut npz = NpzWriter::new_compressed(file);
        let n_frames = i64::try_from(self.n_frames).map_err(|e| persist(e.to_string()))?;
        let n_comps = i64::try_from(self.n_comps).map_err(|e| persist(e.to_string()))?;
        npz.add_array("n_frames", &nd::arr0(n_frames)).map_err(|e| persist(e.to_string()))?;
        npz.add_array("n_comps", &nd::arr0(n_comps)).map_err(|e| persist(e.to_string()))?;
        let texts = [
            ("gender", self.gender.to_string()),
            ("sbj_id", self.sbj_id.clone()),
            ("obj_name", self.obj_name.clone()),
            ("motion_intent", self.motion_intent.clone()),
        ];
        for (key, value) in &texts {
            npz.add_array(*key, &string_to_array(value)).map_err(|e| persist(e.to_string()))?;
        }
        if let Some(framerate) = self.framerate {
            npz.add_array("framerate", &nd::arr0(framerate)).map_err(|e| persist(e.to_string()))?;
        }
        for (actor, block) in &self.actors {
            let template_key = format!("{}/{}", actor.key(), actor.template_key());
            npz.add_array(template_key, &string_to_array(&block.template)).map_err(|e| persist(e.to_string()))?;
            for (name, values) in &block.params {
                npz.add_array(format!("{}/params/{name}", actor.key()), values).map_err(|e| persist(e.to_string()))?;
            }
        }
        self.contact.object.write(&mut npz, "contact/object").map_err(|e| persist(e.to_string()))?;
        self.contact.body.write(&mut npz, "contact/body").map_err(|e| persist(e.to_string()))?;
        npz.finish().map_err(|e| persist(e.to_string()))?;
        Ok(())
    }

    /// Keyed access using the names of the record file, e.g. ``gender``,
    /// ``body/params/transl`` or ``contact/object``
    pub fn get(&self, key: &str) -> Option<RecordField<'_>> {
        match key {
            "n_frames" => return Some(RecordField::Count(self.n_frames)),
            "n_comps" => return Some(RecordField::Count(self.n_comps)),
            "gender" => return Some(RecordField::Gender(self.gender)),
            "sbj_id" => return Some(RecordField::Text(&self.sbj_id)),
            "obj_name" => return Some(RecordField::Text(&self.obj_name)),
            "motion_intent" => return Some(RecordField::Text(&self.motion_intent)),
            "framerate" => return self.framerate.map(RecordField::Scalar),
            "contact/object" => return Some(RecordField::Raw(&self.contact.object)),
            "contact/body" => return Some(RecordField::Raw(&self.contact.body)),
            _ => {}
        }
        let (actor_key, rest) = key.split_once('/')?;
        let actor = Actor::from_key(actor_key)?;
        let block = &self.actors[actor];
        if rest == actor.template_key() {
            return Some(RecordField::Text(&block.template));
        }
        let name = rest.strip_prefix("params/")?;
        block.params.get(name).map(RecordField::Params)
    }

    /// Name of the sequence used in logs, e.g. ``s1/apple_eat_1``
    pub fn sequence_id(&self) -> String {
        let stem = self.path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        match self.path.parent().and_then(Path::file_name) {
            Some(category) => format!("{}/{stem}", category.to_string_lossy()),
            None => stem,
        }
    }

    /// Absolute path of the template an actor is bound to
    pub fn template_path(&self, grab_path: &Path, actor: Actor) -> PathBuf {
        resolve_template(grab_path, &self.actors[actor].template)
    }
}
