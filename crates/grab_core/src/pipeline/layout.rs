use crate::common::types::OutputKind;
use enum_map::EnumMap;
use std::path::{Path, PathBuf};
use strum::IntoEnumIterator;

/// Maps a record under the dataset root to its products under the output root
#[derive(Debug, Clone)]
pub struct OutputLayout {
    grab_path: PathBuf,
    out_path: PathBuf,
}

impl OutputLayout {
    pub fn new(grab_path: &Path, out_path: &Path) -> Self {
        Self {
            grab_path: grab_path.to_path_buf(),
            out_path: out_path.to_path_buf(),
        }
    }

    pub fn grab_path(&self) -> &Path {
        &self.grab_path
    }

    pub fn out_path(&self) -> &Path {
        &self.out_path
    }

    /// Path of the record relative to the dataset root, just the file name
    /// for records that live elsewhere
    pub fn relative<'a>(&self, record_path: &'a Path) -> &'a Path {
        record_path
            .strip_prefix(&self.grab_path)
            .ok()
            .or_else(|| record_path.file_name().map(Path::new))
            .unwrap_or(record_path)
    }

    /// ``<out>/<category>/<name>.npz`` becomes ``<out>/<category>/<name><suffix>``
    pub fn artifact_path(&self, record_path: &Path, kind: OutputKind) -> PathBuf {
        let rel = self.relative(record_path);
        let file_name = rel.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let stem = file_name.strip_suffix(".npz").unwrap_or(&file_name);
        let dir = rel.parent().map_or_else(|| self.out_path.clone(), |p| self.out_path.join(p));
        dir.join(format!("{stem}{}", kind.suffix()))
    }
}

#[derive(Debug, Clone)]
struct IndexEntry {
    path: PathBuf,
    exists: bool,
}

/// Which products of one sequence are already on disk. Built once before the
/// sequence is processed and updated as products are written.
#[derive(Debug, Clone)]
pub struct ArtifactIndex {
    entries: EnumMap<OutputKind, IndexEntry>,
}

impl ArtifactIndex {
    pub fn scan(layout: &OutputLayout, record_path: &Path) -> Self {
        let entries = EnumMap::from_fn(|kind| {
            let path = layout.artifact_path(record_path, kind);
            let exists = path.is_file();
            IndexEntry { path, exists }
        });
        Self { entries }
    }

    pub fn path(&self, kind: OutputKind) -> &Path {
        &self.entries[kind].path
    }

    pub fn exists(&self, kind: OutputKind) -> bool {
        self.entries[kind].exists
    }

    pub fn mark_written(&mut self, kind: OutputKind) {
        self.entries[kind].exists = true;
    }

    /// Kinds whose product is on disk
    pub fn existing(&self) -> Vec<OutputKind> {
        OutputKind::iter().filter(|k| self.exists(*k)).collect()
    }
}
