use super::error::{GrabError, GrabResult};
use log::debug;
use ndarray as nd;
use ply_rs::{
    parser::Parser,
    ply::{Addable, DefaultElement, ElementDef, Encoding, Ply, Property, PropertyDef, PropertyType, ScalarType},
    writer::Writer,
};
use std::{
    collections::HashMap,
    fs::File,
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
};

/// Static geometry a model instance is bound to
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateMesh {
    /// [V, 3]
    pub verts: nd::Array2<f32>,
    /// [F, 3], empty when the file has no faces
    pub faces: nd::Array2<u32>,
}

/// Templates in a record are stored relative to the parent of the dataset root
pub fn resolve_template(grab_path: &Path, rel: &str) -> PathBuf {
    grab_path.join("..").join(rel)
}

fn float_property(element: &DefaultElement, name: &str) -> Option<f32> {
    #[allow(clippy::cast_possible_truncation)]
    match element.get(name)? {
        Property::Float(v) => Some(*v),
        Property::Double(v) => Some(*v as f32),
        _ => None,
    }
}

#[allow(clippy::cast_sign_loss)]
fn index_list(element: &DefaultElement) -> Option<Vec<u32>> {
    let prop = element.get("vertex_indices").or_else(|| element.get("vertex_index"))?;
    match prop {
        Property::ListInt(v) => Some(v.iter().map(|&i| i.max(0) as u32).collect()),
        Property::ListUInt(v) => Some(v.clone()),
        Property::ListUChar(v) => Some(v.iter().map(|&i| u32::from(i)).collect()),
        Property::ListChar(v) => Some(v.iter().map(|&i| i.max(0) as u32).collect()),
        Property::ListShort(v) => Some(v.iter().map(|&i| i.max(0) as u32).collect()),
        Property::ListUShort(v) => Some(v.iter().map(|&i| u32::from(i)).collect()),
        _ => None,
    }
}

impl TemplateMesh {
    pub fn new(verts: nd::Array2<f32>, faces: nd::Array2<u32>) -> Self {
        Self { verts, faces }
    }

    pub fn num_verts(&self) -> usize {
        self.verts.nrows()
    }

    /// Loads a PLY mesh. Polygons are fan triangulated.
    pub fn load(path: &Path) -> GrabResult<Self> {
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => GrabError::NotFound { path: path.to_path_buf() },
            _ => GrabError::Template {
                path: path.to_path_buf(),
                reason: e.to_string(),
            },
        })?;
        let bad = |reason: String| GrabError::Template {
            path: path.to_path_buf(),
            reason,
        };

        let mut reader = BufReader::new(file);
        let parser = Parser::<DefaultElement>::new();
        let header = parser.read_header(&mut reader).map_err(|e| bad(format!("bad header: {e}")))?;
        let payload = parser.read_payload(&mut reader, &header).map_err(|e| bad(format!("bad payload: {e}")))?;

        let vertices = payload.get("vertex").ok_or_else(|| bad("no vertex element".to_string()))?;
        let mut verts = nd::Array2::<f32>::zeros((vertices.len(), 3));
        for (mut row, element) in verts.outer_iter_mut().zip(vertices.iter()) {
            for (c, name) in ["x", "y", "z"].into_iter().enumerate() {
                row[c] = float_property(element, name).ok_or_else(|| bad(format!("vertex without float `{name}`")))?;
            }
        }

        let mut triangles: Vec<u32> = Vec::new();
        if let Some(faces) = payload.get("face") {
            for element in faces {
                let idx = index_list(element).ok_or_else(|| bad("face without index list".to_string()))?;
                if idx.len() < 3 {
                    continue;
                }
                for k in 1..idx.len() - 1 {
                    triangles.extend_from_slice(&[idx[0], idx[k], idx[k + 1]]);
                }
            }
        }
        if let Some(&max) = triangles.iter().max() {
            if max as usize >= verts.nrows() {
                return Err(bad(format!("face index {max} out of range for {} vertices", verts.nrows())));
            }
        }
        let nr_faces = triangles.len() / 3;
        let faces = nd::Array2::from_shape_vec((nr_faces, 3), triangles).map_err(|e| bad(e.to_string()))?;
        debug!("loaded template {} with {} verts and {} faces", path.display(), verts.nrows(), nr_faces);
        Ok(Self { verts, faces })
    }

    /// Writes the mesh as ascii PLY
    pub fn save_ply(&self, path: &Path) -> GrabResult<()> {
        let mut ply = Ply::<DefaultElement>::new();
        ply.header.encoding = Encoding::Ascii;

        let mut vertex_def = ElementDef::new("vertex".to_string());
        for name in ["x", "y", "z"] {
            vertex_def
                .properties
                .add(PropertyDef::new(name.to_string(), PropertyType::Scalar(ScalarType::Float)));
        }
        vertex_def.count = self.verts.nrows();
        ply.header.elements.add(vertex_def);

        let mut face_def = ElementDef::new("face".to_string());
        face_def.properties.add(PropertyDef::new(
            "vertex_indices".to_string(),
            PropertyType::List(ScalarType::UChar, ScalarType::UInt),
        ));
        face_def.count = self.faces.nrows();
        ply.header.elements.add(face_def);

        let vertex_elements = self
            .verts
            .outer_iter()
            .map(|v| {
                let mut element = DefaultElement::new();
                element.insert("x".to_string(), Property::Float(v[0]));
                element.insert("y".to_string(), Property::Float(v[1]));
                element.insert("z".to_string(), Property::Float(v[2]));
                element
            })
            .collect();
        ply.payload.insert("vertex".to_string(), vertex_elements);

        let face_elements = self
            .faces
            .outer_iter()
            .map(|f| {
                let mut element = DefaultElement::new();
                element.insert("vertex_indices".to_string(), Property::ListUInt(f.to_vec()));
                element
            })
            .collect();
        ply.payload.insert("face".to_string(), face_elements);

        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        Writer::new().write_ply(&mut writer, &mut ply).map_err(|e| GrabError::Template {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(())
    }
}

/// Templates of one run keyed by their resolved path. Subject and object meshes
/// repeat across sequences so each is parsed once.
#[derive(Debug, Default)]
pub struct TemplateCache {
    meshes: HashMap<PathBuf, TemplateMesh>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, path: &Path) -> GrabResult<&TemplateMesh> {
        if !self.meshes.contains_key(path) {
            let mesh = TemplateMesh::load(path)?;
            self.meshes.insert(path.to_path_buf(), mesh);
        }
        self.meshes.get(path).ok_or_else(|| GrabError::NotFound { path: path.to_path_buf() })
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    pub fn clear(&mut self) {
        self.meshes.clear();
    }
}
