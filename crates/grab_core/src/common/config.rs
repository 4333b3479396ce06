use super::{
    error::{GrabError, GrabResult},
    types::OutputKind,
};
use crate::models::assets::ModelAssets;
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const CONFIG_ECHO_FILE: &str = "grab_vertices_cfg.toml";

fn default_true() -> bool {
    true
}
fn default_n_verts_sample() -> usize {
    1024
}

/// Which products to write and how. This is the part of the configuration that
/// lives in the optional options file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputOptions {
    #[serde(default)]
    pub save_metadata: bool,
    #[serde(default = "default_true")]
    pub save_body_verts: bool,
    #[serde(default)]
    pub save_hand_joints: bool,
    #[serde(default)]
    pub save_contact: bool,
    #[serde(default)]
    pub save_lhand_verts: bool,
    #[serde(default)]
    pub save_rhand_verts: bool,
    #[serde(default = "default_true")]
    pub save_object_verts: bool,
    #[serde(default)]
    pub force_reprocess: bool,
    #[serde(default = "default_n_verts_sample")]
    pub n_verts_sample: usize,
    /// Seeds the object vertex sampling, draws are not reproducible without it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_seed: Option<u64>,
    /// Threads used to evaluate frames, all cores when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_threads: Option<usize>,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            save_metadata: false,
            save_body_verts: true,
            save_hand_joints: false,
            save_contact: false,
            save_lhand_verts: false,
            save_rhand_verts: false,
            save_object_verts: true,
            force_reprocess: false,
            n_verts_sample: default_n_verts_sample(),
            sample_seed: None,
            num_threads: None,
        }
    }
}

impl OutputOptions {
    pub fn load(path: &Path) -> GrabResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| GrabError::Config(format!("cannot read {}: {e}", path.display())))?;
        toml::from_str(&text).map_err(|e| GrabError::Config(format!("cannot parse {}: {e}", path.display())))
    }

    pub fn is_enabled(&self, kind: OutputKind) -> bool {
        match kind {
            OutputKind::Metadata => self.save_metadata,
            OutputKind::BodyVerts => self.save_body_verts,
            OutputKind::HandJoints => self.save_hand_joints,
            OutputKind::Contact => self.save_contact,
            OutputKind::LeftHandVerts => self.save_lhand_verts,
            OutputKind::RightHandVerts => self.save_rhand_verts,
            OutputKind::ObjectVerts => self.save_object_verts,
        }
    }

    pub fn set_enabled(&mut self, kind: OutputKind, enabled: bool) {
        let flag = match kind {
            OutputKind::Metadata => &mut self.save_metadata,
            OutputKind::BodyVerts => &mut self.save_body_verts,
            OutputKind::HandJoints => &mut self.save_hand_joints,
            OutputKind::Contact => &mut self.save_contact,
            OutputKind::LeftHandVerts => &mut self.save_lhand_verts,
            OutputKind::RightHandVerts => &mut self.save_rhand_verts,
            OutputKind::ObjectVerts => &mut self.save_object_verts,
        };
        *flag = enabled;
    }

    /// Options with exactly the given kinds enabled
    pub fn only(kinds: &[OutputKind]) -> Self {
        let mut options = Self::default();
        for kind in <OutputKind as strum::IntoEnumIterator>::iter() {
            options.set_enabled(kind, kinds.contains(&kind));
        }
        options
    }
}

/// The full configuration of a batch run. Loaded once and never changed while
/// the run is going.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrabConfig {
    pub grab_path: PathBuf,
    pub out_path: PathBuf,
    pub model_path: PathBuf,
    #[serde(flatten)]
    pub options: OutputOptions,
}

impl GrabConfig {
    /// The output root defaults to the dataset root, products then sit next to
    /// the records
    pub fn new(grab_path: PathBuf, out_path: Option<PathBuf>, model_path: PathBuf, options: OutputOptions) -> Self {
        let out_path = out_path.unwrap_or_else(|| grab_path.clone());
        Self {
            grab_path,
            out_path,
            model_path,
            options,
        }
    }

    /// Checks everything a run needs before the first sequence is touched
    pub fn validate(&self) -> GrabResult<()> {
        if !self.grab_path.is_dir() {
            return Err(GrabError::Config(format!("dataset path {} is not a directory", self.grab_path.display())));
        }
        if self.grab_path.parent().is_none() {
            return Err(GrabError::Config(format!(
                "dataset path {} has no parent, templates are resolved from there",
                self.grab_path.display()
            )));
        }
        if self.options.save_object_verts && self.options.n_verts_sample == 0 {
            return Err(GrabError::Config("n_verts_sample must be positive".to_string()));
        }
        if self.options.num_threads == Some(0) {
            return Err(GrabError::Config("num_threads must be positive".to_string()));
        }
        ModelAssets::new(&self.model_path).validate(&self.options)
    }

    /// Writes the configuration next to the outputs and returns its path
    pub fn echo(&self) -> GrabResult<PathBuf> {
        fs::create_dir_all(&self.out_path)?;
        let path = self.out_path.join(CONFIG_ECHO_FILE);
        let text = toml::to_string_pretty(self).map_err(|e| GrabError::Config(format!("cannot serialize configuration: {e}")))?;
        fs::write(&path, text)?;
        info!("configuration written to {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_tool() {
        let options: OutputOptions = toml::from_str("").unwrap();
        assert_eq!(options, OutputOptions::default());
        assert!(options.save_body_verts && options.save_object_verts);
        assert!(!options.save_contact && !options.save_metadata);
        assert_eq!(options.n_verts_sample, 1024);
    }

    #[test]
    fn options_file_overrides() {
        let options: OutputOptions = toml::from_str("save_contact = true\nsave_object_verts = false\nsample_seed = 7\n").unwrap();
        assert!(options.is_enabled(OutputKind::Contact));
        assert!(!options.is_enabled(OutputKind::ObjectVerts));
        assert_eq!(options.sample_seed, Some(7));
    }

    #[test]
    fn only_enables_listed_kinds() {
        let options = OutputOptions::only(&[OutputKind::BodyVerts, OutputKind::Contact]);
        let enabled: Vec<OutputKind> = <OutputKind as strum::IntoEnumIterator>::iter().filter(|k| options.is_enabled(*k)).collect();
        assert_eq!(enabled, vec![OutputKind::BodyVerts, OutputKind::Contact]);
    }

    #[test]
    fn echo_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = GrabConfig::new(dir.path().join("grab"), Some(dir.path().join("out")), dir.path().join("models"), OutputOptions::default());
        let path = cfg.echo().unwrap();
        let back: GrabConfig = toml::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn missing_dataset_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = GrabConfig::new(dir.path().join("nope"), None, dir.path().to_path_buf(), OutputOptions::default());
        assert!(matches!(cfg.validate(), Err(GrabError::Config(_))));
    }
}
