use crate::{mesh::ColoredMesh, viewer::MeshViewer};
use grab_core::common::error::{GrabError, GrabResult};
use grab_utils::vector::Matrix4f;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

pub const SCENE_FILE: &str = "scene.ply";
pub const CAMERA_FILE: &str = "camera.json";

/// Camera written next to the scene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraSidecar {
    /// Row major world from camera transform
    pub world_from_camera: [[f32; 4]; 4],
    /// Number of scenes shown so far
    pub frame: usize,
}

/// Writes the meshes of a scene as one binary little endian PLY with per vertex
/// colors. Triangles go to ``face``, wireframe meshes to ``edge``.
#[allow(clippy::cast_possible_truncation)]
pub fn write_scene_ply<W: Write>(meshes: &[ColoredMesh], writer: &mut W) -> std::io::Result<()> {
    let nr_verts: usize = meshes.iter().map(ColoredMesh::num_verts).sum();
    let nr_faces: usize = meshes.iter().filter(|m| !m.wireframe).map(|m| m.faces.nrows()).sum();
    let edges: Vec<Vec<[u32; 2]>> = meshes.iter().map(|m| if m.wireframe { m.edges() } else { Vec::new() }).collect();
    let nr_edges: usize = edges.iter().map(Vec::len).sum();

    writeln!(writer, "ply")?;
    writeln!(writer, "format binary_little_endian 1.0")?;
    for mesh in meshes {
        writeln!(writer, "comment mesh {} {}", mesh.name, mesh.num_verts())?;
    }
    writeln!(writer, "element vertex {nr_verts}")?;
    writeln!(writer, "property float x")?;
    writeln!(writer, "property float y")?;
    writeln!(writer, "property float z")?;
    writeln!(writer, "property uchar red")?;
    writeln!(writer, "property uchar green")?;
    writeln!(writer, "property uchar blue")?;
    writeln!(writer, "element face {nr_faces}")?;
    writeln!(writer, "property list uchar int vertex_indices")?;
    writeln!(writer, "element edge {nr_edges}")?;
    writeln!(writer, "property int vertex1")?;
    writeln!(writer, "property int vertex2")?;
    writeln!(writer, "end_header")?;

    for mesh in meshes {
        for (v, c) in mesh.verts.outer_iter().zip(mesh.colors.outer_iter()) {
            for x in v {
                writer.write_all(&x.to_le_bytes())?;
            }
            writer.write_all(&[c[0], c[1], c[2]])?;
        }
    }

    let mut offset = 0_u32;
    for mesh in meshes {
        if !mesh.wireframe {
            for f in mesh.faces.outer_iter() {
                writer.write_all(&[3u8])?;
                for &i in f {
                    writer.write_all(&((i + offset) as i32).to_le_bytes())?;
                }
            }
        }
        offset += mesh.num_verts() as u32;
    }

    let mut offset = 0_u32;
    for (mesh, mesh_edges) in meshes.iter().zip(&edges) {
        for [a, b] in mesh_edges {
            writer.write_all(&((a + offset) as i32).to_le_bytes())?;
            writer.write_all(&((b + offset) as i32).to_le_bytes())?;
        }
        offset += mesh.num_verts() as u32;
    }
    writer.flush()
}

/// A viewer session backed by one PLY file that is replaced in place for every
/// scene, so a mesh viewer that watches the file shows the sequence playing
#[derive(Debug)]
pub struct PlyLiveViewer {
    dir: PathBuf,
    camera: Option<Matrix4f>,
    frame: usize,
}

impl PlyLiveViewer {
    pub fn new(dir: &Path) -> GrabResult<Self> {
        fs::create_dir_all(dir)?;
        info!("viewer session at {}", dir.join(SCENE_FILE).display());
        Ok(Self {
            dir: dir.to_path_buf(),
            camera: None,
            frame: 0,
        })
    }

    pub fn scene_path(&self) -> PathBuf {
        self.dir.join(SCENE_FILE)
    }

    pub fn camera_path(&self) -> PathBuf {
        self.dir.join(CAMERA_FILE)
    }

    pub fn frame(&self) -> usize {
        self.frame
    }

    fn replace<F>(&self, path: &Path, write: F) -> GrabResult<()>
    where
        F: FnOnce(&mut BufWriter<&mut fs::File>) -> std::io::Result<()>,
    {
        let persistence = |reason: String| GrabError::Persistence {
            path: path.to_path_buf(),
            reason,
        };
        let mut tmp = tempfile::Builder::new()
            .prefix(".")
            .suffix(".part")
            .tempfile_in(&self.dir)
            .map_err(|e| persistence(e.to_string()))?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            write(&mut writer)
                .and_then(|()| writer.flush())
                .map_err(|e| persistence(e.to_string()))?;
        }
        tmp.persist(path).map_err(|e| persistence(e.error.to_string()))?;
        Ok(())
    }

    fn write_camera(&self) -> GrabResult<()> {
        let Some(pose) = self.camera else { return Ok(()) };
        let sidecar = CameraSidecar {
            world_from_camera: std::array::from_fn(|r| std::array::from_fn(|c| pose[(r, c)])),
            frame: self.frame,
        };
        let text = serde_json::to_string_pretty(&sidecar).map_err(|e| GrabError::Persistence {
            path: self.camera_path(),
            reason: e.to_string(),
        })?;
        self.replace(&self.camera_path(), |w| w.write_all(text.as_bytes()))
    }
}

impl MeshViewer for PlyLiveViewer {
    fn set_camera_pose(&mut self, pose: &Matrix4f) -> GrabResult<()> {
        self.camera = Some(*pose);
        self.write_camera()
    }

    fn set_static_meshes(&mut self, meshes: &[ColoredMesh]) -> GrabResult<()> {
        self.replace(&self.scene_path(), |w| write_scene_ply(meshes, w))?;
        self.frame += 1;
        debug!("scene {} with {} meshes", self.frame, meshes.len());
        self.write_camera()
    }

    fn close(&mut self) -> GrabResult<()> {
        info!("viewer session closed after {} scenes", self.frame);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::colors;
    use ndarray::{array, Array2};

    fn header_of(bytes: &[u8]) -> String {
        let end = bytes.windows(11).position(|w| w == b"end_header\n").unwrap() + 11;
        String::from_utf8(bytes[..end].to_vec()).unwrap()
    }

    fn triangle(name: &str) -> ColoredMesh {
        ColoredMesh::new(name, Array2::from_elem((3, 3), 0.5), array![[0_u32, 1, 2]], colors::YELLOW)
    }

    #[test]
    fn scene_counts_and_size() {
        let meshes = vec![triangle("object"), triangle("hand").wireframe()];
        let mut bytes = Vec::new();
        write_scene_ply(&meshes, &mut bytes).unwrap();
        let header = header_of(&bytes);
        assert!(header.contains("format binary_little_endian 1.0"));
        assert!(header.contains("element vertex 6\n"));
        assert!(header.contains("element face 1\n"));
        assert!(header.contains("element edge 3\n"));
        // 15 bytes per vertex, 13 per triangle, 8 per edge
        assert_eq!(bytes.len() - header.len(), 6 * 15 + 13 + 3 * 8);
    }

    #[test]
    fn wireframe_edges_are_offset() {
        let meshes = vec![triangle("object"), triangle("hand").wireframe()];
        let mut bytes = Vec::new();
        write_scene_ply(&meshes, &mut bytes).unwrap();
        let body = &bytes[header_of(&bytes).len()..];
        let edges = &body[6 * 15 + 13..];
        let first = i32::from_le_bytes(edges[..4].try_into().unwrap());
        let second = i32::from_le_bytes(edges[4..8].try_into().unwrap());
        assert_eq!((first, second), (3, 4));
    }

    #[test]
    fn session_replaces_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut viewer = PlyLiveViewer::new(dir.path()).unwrap();
        viewer.set_camera_pose(&Matrix4f::identity()).unwrap();
        viewer.set_static_meshes(&[triangle("a")]).unwrap();
        viewer.set_static_meshes(&[triangle("a"), triangle("b")]).unwrap();
        viewer.close().unwrap();

        let names: Vec<String> = fs::read_dir(dir.path()).unwrap().map(|e| e.unwrap().file_name().to_string_lossy().into_owned()).collect();
        assert_eq!(names.len(), 2, "{names:?}");
        let header = header_of(&fs::read(viewer.scene_path()).unwrap());
        assert!(header.contains("element vertex 6\n"));

        let camera: CameraSidecar = serde_json::from_str(&fs::read_to_string(viewer.camera_path()).unwrap()).unwrap();
        assert_eq!(camera.frame, 2);
        assert_eq!(camera.world_from_camera[3], [0.0, 0.0, 0.0, 1.0]);
    }
}
