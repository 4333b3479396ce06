use super::{mano::ManoData, smpl_x::SmplXData};
use crate::common::{
    config::OutputOptions,
    error::{GrabError, GrabResult},
    types::{Gender, Handedness, OutputKind},
};
use enum_map::EnumMap;
use log::info;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use strum::IntoEnumIterator;

/// Layout of the model asset root:
/// ``smplx/SMPLX_{NEUTRAL,MALE,FEMALE}.npz`` and ``mano/MANO_{LEFT,RIGHT}.npz``
#[derive(Debug, Clone)]
pub struct ModelAssets {
    root: PathBuf,
}

impl ModelAssets {
    pub fn new(root: &Path) -> Self {
        Self { root: root.to_path_buf() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn smplx_path(&self, gender: Gender) -> PathBuf {
        self.root.join("smplx").join(format!("SMPLX_{}.npz", gender.file_tag()))
    }

    pub fn mano_path(&self, handedness: Handedness) -> PathBuf {
        self.root.join("mano").join(format!("MANO_{}.npz", handedness.file_tag()))
    }

    /// Checks that the files the enabled kinds need are present. A missing body
    /// model of one gender is only reported when a sequence needs it.
    pub fn validate(&self, options: &OutputOptions) -> GrabResult<()> {
        if !self.root.is_dir() {
            return Err(GrabError::Config(format!("model path {} is not a directory", self.root.display())));
        }
        let needs_body = options.is_enabled(OutputKind::BodyVerts) || options.is_enabled(OutputKind::HandJoints);
        if needs_body && !Gender::iter().any(|g| self.smplx_path(g).is_file()) {
            return Err(GrabError::Config(format!(
                "model path {} has no SMPL-X model files (expected smplx/SMPLX_<GENDER>.npz)",
                self.root.display()
            )));
        }
        for (kind, side) in [(OutputKind::LeftHandVerts, Handedness::Left), (OutputKind::RightHandVerts, Handedness::Right)] {
            if options.is_enabled(kind) && !self.mano_path(side).is_file() {
                return Err(GrabError::Config(format!("missing MANO model {}", self.mano_path(side).display())));
            }
        }
        Ok(())
    }
}

/// Model arrays loaded on first use and shared by every sequence afterwards
#[derive(Debug, Default)]
pub struct ModelCache {
    smplx: EnumMap<Gender, Option<Arc<SmplXData>>>,
    mano: EnumMap<Handedness, Option<Arc<ManoData>>>,
    assets: Option<ModelAssets>,
}

impl ModelCache {
    pub fn new(assets: ModelAssets) -> Self {
        Self {
            assets: Some(assets),
            ..Default::default()
        }
    }

    fn assets(&self) -> GrabResult<&ModelAssets> {
        self.assets
            .as_ref()
            .ok_or_else(|| GrabError::Config("no model asset root configured".to_string()))
    }

    pub fn add_smplx(&mut self, data: SmplXData) {
        let gender = data.gender;
        self.smplx[gender] = Some(Arc::new(data));
    }

    pub fn add_mano(&mut self, data: ManoData) {
        let handedness = data.handedness;
        self.mano[handedness] = Some(Arc::new(data));
    }

    pub fn smplx(&mut self, gender: Gender) -> GrabResult<Arc<SmplXData>> {
        if let Some(model) = &self.smplx[gender] {
            return Ok(model.clone());
        }
        let path = self.assets()?.smplx_path(gender);
        if !path.is_file() {
            return Err(GrabError::NotFound { path });
        }
        info!("lazy loading SMPL-X {gender}");
        let model = Arc::new(SmplXData::new_from_npz(&path, gender)?);
        self.smplx[gender] = Some(model.clone());
        Ok(model)
    }

    pub fn mano(&mut self, handedness: Handedness) -> GrabResult<Arc<ManoData>> {
        if let Some(model) = &self.mano[handedness] {
            return Ok(model.clone());
        }
        let path = self.assets()?.mano_path(handedness);
        if !path.is_file() {
            return Err(GrabError::NotFound { path });
        }
        info!("lazy loading MANO {handedness}");
        let model = Arc::new(ManoData::new_from_npz(&path, handedness)?);
        self.mano[handedness] = Some(model.clone());
        Ok(model)
    }

    pub fn remove_all_models(&mut self) {
        self.smplx = EnumMap::default();
        self.mano = EnumMap::default();
    }
}
