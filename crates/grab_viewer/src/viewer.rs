use crate::mesh::ColoredMesh;
use grab_core::common::error::GrabResult;
use grab_utils::vector::Matrix4f;

/// A viewer session that shows one static scene at a time. Every call to
/// [`MeshViewer::set_static_meshes`] replaces the previous scene in the same
/// session.
pub trait MeshViewer {
    /// World from camera transform, kept until the next call
    fn set_camera_pose(&mut self, pose: &Matrix4f) -> GrabResult<()>;
    /// Returns once the scene has been handed over
    fn set_static_meshes(&mut self, meshes: &[ColoredMesh]) -> GrabResult<()>;
    fn close(&mut self) -> GrabResult<()>;
}

/// Keeps every scene in memory, for headless runs
#[derive(Debug, Default)]
pub struct RecordingViewer {
    pub camera: Option<Matrix4f>,
    pub scenes: Vec<Vec<ColoredMesh>>,
    pub closed: bool,
}

impl RecordingViewer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_scenes(&self) -> usize {
        self.scenes.len()
    }

    pub fn last_scene(&self) -> Option<&[ColoredMesh]> {
        self.scenes.last().map(Vec::as_slice)
    }
}

impl MeshViewer for RecordingViewer {
    fn set_camera_pose(&mut self, pose: &Matrix4f) -> GrabResult<()> {
        self.camera = Some(*pose);
        Ok(())
    }

    fn set_static_meshes(&mut self, meshes: &[ColoredMesh]) -> GrabResult<()> {
        self.scenes.push(meshes.to_vec());
        Ok(())
    }

    fn close(&mut self) -> GrabResult<()> {
        self.closed = true;
        Ok(())
    }
}
