use log::debug;
use ndarray as nd;
use ndarray_npy::{NpzReader, NpzWriter, ReadNpzError, WriteNpzError};
use std::{
    collections::BTreeSet,
    fs::File,
    io::{Read, Seek, Write},
    path::{Path, PathBuf},
};
use strum::IntoEnumIterator;
use strum_macros::EnumIter;
use thiserror::Error;
use walkdir::WalkDir;

/// associating a extension with a enum
#[derive(Debug, EnumIter, PartialEq, Eq, Clone, Copy)]
pub enum FileType {
    Npz,
    Ply,
    Unknown,
}
impl FileType {
    pub fn value(&self) -> &'static [&'static str] {
        match self {
            Self::Npz => &["npz"],
            Self::Ply => &["ply"],
            Self::Unknown => &[""],
        }
    }
    pub fn find_match(ext: &str) -> Self {
        Self::iter()
            .find(|filetype| filetype.value().contains(&(ext.to_lowercase()).as_str()))
            .unwrap_or(FileType::Unknown)
    }
    pub fn of_path(path: &Path) -> Self {
        path.extension().and_then(|e| e.to_str()).map_or(FileType::Unknown, Self::find_match)
    }
}

/// Lists files of ``file_type`` exactly ``depth`` directories below ``root``,
/// sorted by path. Used for the ``<root>/<category>/<file>`` dataset layout.
pub fn list_files(root: &Path, depth: usize, file_type: FileType) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .min_depth(depth)
        .max_depth(depth)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|p| FileType::of_path(p) == file_type)
        .collect();
    files.sort();
    files
}

#[derive(Debug, Error)]
pub enum NpzError {
    #[error("cannot open {path}: {source}")]
    Open { path: PathBuf, source: std::io::Error },
    #[error("not a readable npz archive: {0}")]
    Archive(#[from] ReadNpzError),
    #[error("missing array `{0}`")]
    MissingKey(String),
    #[error("array `{key}` has unsupported dtype or rank")]
    UnsupportedArray { key: String },
    #[error("array `{key}` is not valid utf-8 text")]
    NotText { key: String },
    #[error("array `{key}` is empty, expected a scalar")]
    NotScalar { key: String },
    #[error("failed writing npz: {0}")]
    Write(#[from] WriteNpzError),
}

/// A numeric array read from a npz archive with whatever dtype it was stored
/// with. Lets callers pass arrays through untouched or cast them when needed.
#[derive(Debug, Clone, PartialEq)]
pub enum NpyArray {
    Bool(nd::ArrayD<bool>),
    U8(nd::ArrayD<u8>),
    I8(nd::ArrayD<i8>),
    I32(nd::ArrayD<i32>),
    I64(nd::ArrayD<i64>),
    U32(nd::ArrayD<u32>),
    U64(nd::ArrayD<u64>),
    F32(nd::ArrayD<f32>),
    F64(nd::ArrayD<f64>),
}

macro_rules! npy_dispatch {
    ($self:expr, $a:ident => $body:expr) => {
        match $self {
            NpyArray::Bool($a) => $body,
            NpyArray::U8($a) => $body,
            NpyArray::I8($a) => $body,
            NpyArray::I32($a) => $body,
            NpyArray::I64($a) => $body,
            NpyArray::U32($a) => $body,
            NpyArray::U64($a) => $body,
            NpyArray::F32($a) => $body,
            NpyArray::F64($a) => $body,
        }
    };
}

impl NpyArray {
    pub fn shape(&self) -> &[usize] {
        npy_dispatch!(self, a => a.shape())
    }
    /// Size of the first axis, 1 for scalars
    pub fn leading_dim(&self) -> usize {
        self.shape().first().copied().unwrap_or(1)
    }
    #[allow(clippy::cast_precision_loss)]
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_f32(&self) -> nd::ArrayD<f32> {
        match self {
            NpyArray::Bool(a) => a.mapv(|x| if x { 1.0 } else { 0.0 }),
            NpyArray::U8(a) => a.mapv(f32::from),
            NpyArray::I8(a) => a.mapv(f32::from),
            NpyArray::I32(a) => a.mapv(|x| x as f32),
            NpyArray::I64(a) => a.mapv(|x| x as f32),
            NpyArray::U32(a) => a.mapv(|x| x as f32),
            NpyArray::U64(a) => a.mapv(|x| x as f32),
            NpyArray::F32(a) => a.clone(),
            NpyArray::F64(a) => a.mapv(|x| x as f32),
        }
    }
    pub fn write<W: Write + Seek>(&self, npz: &mut NpzWriter<W>, name: &str) -> Result<(), WriteNpzError> {
        npy_dispatch!(self, a => npz.add_array(name, a))
    }
}

macro_rules! npy_from {
    ($($t:ty => $variant:ident),*) => {
        $(impl<D: nd::Dimension> From<nd::Array<$t, D>> for NpyArray {
            fn from(a: nd::Array<$t, D>) -> Self {
                NpyArray::$variant(a.into_dyn())
            }
        })*
    };
}
npy_from!(bool => Bool, u8 => U8, i8 => I8, i32 => I32, i64 => I64, u32 => U32, u64 => U64, f32 => F32, f64 => F64);

/// Read access to a ``.npz`` archive by array name. Arrays written by numpy
/// carry a ``.npy`` suffix in the archive, names here are given without it.
/// Float and integer arrays are read regardless of the stored width.
pub struct NpzArchive<R: Read + Seek> {
    npz: NpzReader<R>,
    names: BTreeSet<String>,
}

impl NpzArchive<File> {
    pub fn open(path: &Path) -> Result<Self, NpzError> {
        let file = File::open(path).map_err(|source| NpzError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("opening npz {}", path.display());
        Self::new(file)
    }
}

impl<R: Read + Seek> NpzArchive<R> {
    pub fn new(reader: R) -> Result<Self, NpzError> {
        let mut npz = NpzReader::new(reader)?;
        let names = npz
            .names()?
            .into_iter()
            .map(|n| n.strip_suffix(".npy").map_or(n.clone(), str::to_string))
            .collect();
        Ok(Self { npz, names })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.names.contains(key)
    }

    fn read_typed<A, D>(&mut self, key: &str) -> Option<nd::Array<A, D>>
    where
        A: ndarray_npy::ReadableElement,
        D: nd::Dimension,
    {
        let with_suffix = format!("{key}.npy");
        let found = [key, with_suffix.as_str()]
            .into_iter()
            .find_map(|name| self.npz.by_name::<nd::OwnedRepr<A>, D>(name).ok());
        found
    }

    /// Reads an array keeping its stored dtype
    pub fn read_raw(&mut self, key: &str) -> Result<NpyArray, NpzError> {
        if !self.contains(key) {
            return Err(NpzError::MissingKey(key.to_string()));
        }
        if let Some(a) = self.read_typed::<f32, nd::IxDyn>(key) {
            return Ok(NpyArray::F32(a));
        }
        if let Some(a) = self.read_typed::<f64, nd::IxDyn>(key) {
            return Ok(NpyArray::F64(a));
        }
        if let Some(a) = self.read_typed::<i64, nd::IxDyn>(key) {
            return Ok(NpyArray::I64(a));
        }
        if let Some(a) = self.read_typed::<i32, nd::IxDyn>(key) {
            return Ok(NpyArray::I32(a));
        }
        if let Some(a) = self.read_typed::<u32, nd::IxDyn>(key) {
            return Ok(NpyArray::U32(a));
        }
        if let Some(a) = self.read_typed::<u64, nd::IxDyn>(key) {
            return Ok(NpyArray::U64(a));
        }
        if let Some(a) = self.read_typed::<i8, nd::IxDyn>(key) {
            return Ok(NpyArray::I8(a));
        }
        if let Some(a) = self.read_typed::<u8, nd::IxDyn>(key) {
            return Ok(NpyArray::U8(a));
        }
        if let Some(a) = self.read_typed::<bool, nd::IxDyn>(key) {
            return Ok(NpyArray::Bool(a));
        }
        Err(NpzError::UnsupportedArray { key: key.to_string() })
    }

    /// Reads any numeric array as f32 with a fixed rank
    pub fn read_f32<D: nd::Dimension>(&mut self, key: &str) -> Result<nd::Array<f32, D>, NpzError> {
        self.read_raw(key)?
            .to_f32()
            .into_dimensionality::<D>()
            .map_err(|_| NpzError::UnsupportedArray { key: key.to_string() })
    }

    /// Reads any integer array as indices
    #[allow(clippy::cast_sign_loss)]
    #[allow(clippy::cast_possible_truncation)]
    pub fn read_indices<D: nd::Dimension>(&mut self, key: &str) -> Result<nd::Array<usize, D>, NpzError> {
        let raw = self.read_raw(key)?;
        let arr: nd::ArrayD<usize> = match raw {
            NpyArray::I64(a) => a.mapv(|x| x.max(0) as usize),
            NpyArray::I32(a) => a.mapv(|x| x.max(0) as usize),
            NpyArray::I8(a) => a.mapv(|x| x.max(0) as usize),
            NpyArray::U8(a) => a.mapv(usize::from),
            NpyArray::U32(a) => a.mapv(|x| x as usize),
            NpyArray::U64(a) => a.mapv(|x| x as usize),
            NpyArray::Bool(_) | NpyArray::F32(_) | NpyArray::F64(_) => return Err(NpzError::UnsupportedArray { key: key.to_string() }),
        };
        arr.into_dimensionality::<D>()
            .map_err(|_| NpzError::UnsupportedArray { key: key.to_string() })
    }

    /// Reads the first element of a numeric array as an integer
    #[allow(clippy::cast_sign_loss)]
    #[allow(clippy::cast_possible_truncation)]
    pub fn read_usize(&mut self, key: &str) -> Result<usize, NpzError> {
        let values = self.read_raw(key)?.to_f32();
        values
            .iter()
            .next()
            .map(|v| v.max(0.0).round() as usize)
            .ok_or_else(|| NpzError::NotScalar { key: key.to_string() })
    }

    pub fn read_scalar_f32(&mut self, key: &str) -> Result<f32, NpzError> {
        let values = self.read_raw(key)?.to_f32();
        values.iter().next().copied().ok_or_else(|| NpzError::NotScalar { key: key.to_string() })
    }

    /// Text is stored as a 1D array of utf-8 bytes
    pub fn read_string(&mut self, key: &str) -> Result<String, NpzError> {
        let bytes = match self.read_raw(key)? {
            NpyArray::U8(a) => a.into_iter().collect::<Vec<u8>>(),
            NpyArray::I8(a) => a.into_iter().map(|b| b.to_ne_bytes()[0]).collect(),
            _ => return Err(NpzError::NotText { key: key.to_string() }),
        };
        String::from_utf8(bytes).map_err(|_| NpzError::NotText { key: key.to_string() })
    }
}

/// Encodes text the way [`NpzArchive::read_string`] expects it
pub fn string_to_array(text: &str) -> nd::Array1<u8> {
    nd::Array1::from_vec(text.as_bytes().to_vec())
}
