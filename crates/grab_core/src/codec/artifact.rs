use crate::common::{
    error::{GrabError, GrabResult},
    types::OutputKind,
};
use grab_utils::io::NpyArray;
use log::debug;
use ndarray as nd;
use ndarray_npy::NpzWriter;
use std::path::Path;

/// All arrays of one output kind for one sequence, written in a single step
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactBundle {
    pub kind: OutputKind,
    pub n_frames: usize,
    arrays: Vec<(String, NpyArray)>,
}

/// Broadcasts a text to [T, len] bytes
pub fn broadcast_text(text: &str, n_frames: usize) -> nd::Array2<u8> {
    let bytes = text.as_bytes();
    nd::Array2::from_shape_fn((n_frames, bytes.len()), |(_, i)| bytes[i])
}

impl ArtifactBundle {
    pub fn new(kind: OutputKind, n_frames: usize) -> Self {
        Self {
            kind,
            n_frames,
            arrays: Vec::new(),
        }
    }

    /// Adds an array, its first axis has to be the frame axis
    pub fn push(&mut self, name: &str, array: impl Into<NpyArray>) -> GrabResult<()> {
        let array = array.into();
        if array.shape().is_empty() || array.leading_dim() != self.n_frames {
            return Err(GrabError::invalid_params(
                "artifact",
                format!("`{name}` of the {} product has shape {:?}, expected {} frames", self.kind, array.shape(), self.n_frames),
            ));
        }
        self.arrays.push((name.to_string(), array));
        Ok(())
    }

    pub fn with(mut self, name: &str, array: impl Into<NpyArray>) -> GrabResult<Self> {
        self.push(name, array)?;
        Ok(self)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.arrays.iter().map(|(n, _)| n.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&NpyArray> {
        self.arrays.iter().find(|(n, _)| n == name).map(|(_, a)| a)
    }

    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    /// Writes the bundle as a compressed npz. The archive is assembled in a
    /// hidden sibling file and renamed over ``path``, readers never see a
    /// partial file.
    pub fn save(&self, path: &Path) -> GrabResult<()> {
        let persist = |reason: String| GrabError::Persistence {
            path: path.to_path_buf(),
            reason,
        };
        let parent = path.parent().ok_or_else(|| persist("path has no parent directory".to_string()))?;
        std::fs::create_dir_all(parent).map_err(|e| persist(e.to_string()))?;
        let mut tmp = tempfile::Builder::new()
            .prefix(".")
            .suffix(".part")
            .tempfile_in(parent)
            .map_err(|e| persist(e.to_string()))?;
        {
            let mut npz = NpzWriter::new_compressed(tmp.as_file_mut());
            for (name, array) in &self.arrays {
                array.write(&mut npz, name).map_err(|e| persist(e.to_string()))?;
            }
            npz.finish().map_err(|e| persist(e.to_string()))?;
        }
        tmp.as_file().sync_all().map_err(|e| persist(e.to_string()))?;
        tmp.persist(path).map_err(|e| persist(e.error.to_string()))?;
        debug!("wrote {} arrays to {}", self.arrays.len(), path.display());
        Ok(())
    }
}
