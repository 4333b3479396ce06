use grab_utils::vector::{color_to_u8, Color3f};
use itertools::Itertools;
use log::warn;
use ndarray as nd;
use std::collections::HashMap;

/// Named colors of the scenes
pub mod colors {
    use grab_utils::vector::Color3f;

    pub const PINK: Color3f = [1.00, 0.75, 0.80];
    pub const PURPLE: Color3f = [0.63, 0.13, 0.94];
    pub const RED: Color3f = [1.0, 0.0, 0.0];
    pub const GREEN: Color3f = [0.0, 1.0, 0.0];
    pub const YELLOW: Color3f = [1.0, 1.0, 0.0];
    pub const BROWN: Color3f = [1.00, 0.25, 0.25];
    pub const BLUE: Color3f = [0.0, 0.0, 1.0];
    pub const WHITE: Color3f = [1.0, 1.0, 1.0];
    pub const ORANGE: Color3f = [1.00, 0.65, 0.00];
    pub const GREY: Color3f = [0.75, 0.75, 0.75];
    pub const BLACK: Color3f = [0.0, 0.0, 0.0];
    /// Skin of bodies and hands
    pub const SKIN: Color3f = [0.3, 0.3, 0.6];

    pub fn by_name(name: &str) -> Option<Color3f> {
        let color = match name.to_lowercase().as_str() {
            "pink" => PINK,
            "purple" => PURPLE,
            "red" => RED,
            "green" => GREEN,
            "yellow" => YELLOW,
            "brown" => BROWN,
            "blue" => BLUE,
            "white" => WHITE,
            "orange" => ORANGE,
            "grey" | "gray" => GREY,
            "black" => BLACK,
            _ => return None,
        };
        Some(color)
    }
}

/// A triangle mesh with one color per vertex, the unit a viewer draws
#[derive(Debug, Clone, PartialEq)]
pub struct ColoredMesh {
    pub name: String,
    /// [V, 3]
    pub verts: nd::Array2<f32>,
    /// [F, 3]
    pub faces: nd::Array2<u32>,
    /// [V, 3]
    pub colors: nd::Array2<u8>,
    pub wireframe: bool,
    pub smooth: bool,
}

impl ColoredMesh {
    pub fn new(name: &str, verts: nd::Array2<f32>, faces: nd::Array2<u32>, color: Color3f) -> Self {
        let rgb = color_to_u8(&color);
        let colors = nd::Array2::from_shape_fn((verts.nrows(), 3), |(_, c)| rgb[c]);
        Self {
            name: name.to_string(),
            verts,
            faces,
            colors,
            wireframe: false,
            smooth: false,
        }
    }

    #[must_use]
    pub fn wireframe(mut self) -> Self {
        self.wireframe = true;
        self
    }

    #[must_use]
    pub fn smooth(mut self) -> Self {
        self.smooth = true;
        self
    }

    pub fn num_verts(&self) -> usize {
        self.verts.nrows()
    }

    /// Paints the vertices where ``mask`` is set
    pub fn set_vertex_colors(&mut self, color: Color3f, mask: nd::ArrayView1<bool>) {
        if mask.len() != self.num_verts() {
            warn!("{}: color mask has {} entries for {} verts", self.name, mask.len(), self.num_verts());
        }
        let rgb = nd::arr1(&color_to_u8(&color));
        for (mut row, _) in self.colors.outer_iter_mut().zip(mask.iter()).filter(|(_, m)| **m) {
            row.assign(&rgb);
        }
    }

    /// Unique undirected edges of the faces, smaller index first
    pub fn edges(&self) -> Vec<[u32; 2]> {
        self.faces
            .outer_iter()
            .flat_map(|f| [[f[0], f[1]], [f[1], f[2]], [f[2], f[0]]])
            .map(|[a, b]| if a < b { [a, b] } else { [b, a] })
            .sorted()
            .dedup()
            .collect()
    }
}

/// Unit icosphere, each subdivision splits every triangle in four
pub fn icosphere(subdivisions: usize) -> (nd::Array2<f32>, nd::Array2<u32>) {
    let t = (1.0 + 5.0_f32.sqrt()) / 2.0;
    let mut verts: Vec<[f32; 3]> = vec![
        [-1.0, t, 0.0],
        [1.0, t, 0.0],
        [-1.0, -t, 0.0],
        [1.0, -t, 0.0],
        [0.0, -1.0, t],
        [0.0, 1.0, t],
        [0.0, -1.0, -t],
        [0.0, 1.0, -t],
        [t, 0.0, -1.0],
        [t, 0.0, 1.0],
        [-t, 0.0, -1.0],
        [-t, 0.0, 1.0],
    ];
    let mut faces: Vec<[u32; 3]> = vec![
        [0, 11, 5],
        [0, 5, 1],
        [0, 1, 7],
        [0, 7, 10],
        [0, 10, 11],
        [1, 5, 9],
        [5, 11, 4],
        [11, 10, 2],
        [10, 7, 6],
        [7, 1, 8],
        [3, 9, 4],
        [3, 4, 2],
        [3, 2, 6],
        [3, 6, 8],
        [3, 8, 9],
        [4, 9, 5],
        [2, 4, 11],
        [6, 2, 10],
        [8, 6, 7],
        [9, 8, 1],
    ];
    for _ in 0..subdivisions {
        let mut midpoints: HashMap<(u32, u32), u32> = HashMap::new();
        let mut midpoint = |a: u32, b: u32, verts: &mut Vec<[f32; 3]>| -> u32 {
            let key = (a.min(b), a.max(b));
            *midpoints.entry(key).or_insert_with(|| {
                let (va, vb) = (verts[a as usize], verts[b as usize]);
                verts.push([(va[0] + vb[0]) / 2.0, (va[1] + vb[1]) / 2.0, (va[2] + vb[2]) / 2.0]);
                #[allow(clippy::cast_possible_truncation)]
                let idx = (verts.len() - 1) as u32;
                idx
            })
        };
        let mut next = Vec::with_capacity(faces.len() * 4);
        for [a, b, c] in faces {
            let ab = midpoint(a, b, &mut verts);
            let bc = midpoint(b, c, &mut verts);
            let ca = midpoint(c, a, &mut verts);
            next.extend_from_slice(&[[a, ab, ca], [b, bc, ab], [c, ca, bc], [ab, bc, ca]]);
        }
        faces = next;
    }
    let verts = nd::Array2::from_shape_fn((verts.len(), 3), |(v, c)| {
        let p = verts[v];
        let norm = (p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt();
        p[c] / norm
    });
    let faces = nd::Array2::from_shape_fn((faces.len(), 3), |(f, c)| faces[f][c]);
    (verts, faces)
}

/// One small sphere per point, merged into a single mesh
#[allow(clippy::cast_possible_truncation)]
pub fn points_to_spheres(name: &str, points: nd::ArrayView2<f32>, radius: f32, color: Color3f) -> ColoredMesh {
    let (sphere_verts, sphere_faces) = icosphere(1);
    let (nr_sphere_verts, nr_sphere_faces) = (sphere_verts.nrows(), sphere_faces.nrows());
    let nr_points = points.nrows();
    let mut verts = nd::Array2::<f32>::zeros((nr_points * nr_sphere_verts, 3));
    let mut faces = nd::Array2::<u32>::zeros((nr_points * nr_sphere_faces, 3));
    for (i, point) in points.outer_iter().enumerate() {
        let mut block = verts.slice_mut(nd::s![i * nr_sphere_verts..(i + 1) * nr_sphere_verts, ..]);
        block.assign(&(&sphere_verts * radius));
        block += &point;
        let offset = (i * nr_sphere_verts) as u32;
        faces
            .slice_mut(nd::s![i * nr_sphere_faces..(i + 1) * nr_sphere_faces, ..])
            .assign(&sphere_faces.mapv(|f| f + offset));
    }
    ColoredMesh::new(name, verts, faces, color)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn contact_mask_paints_vertices() {
        let mut mesh = ColoredMesh::new("object", nd::Array2::zeros((3, 3)), array![[0_u32, 1, 2]], colors::YELLOW);
        mesh.set_vertex_colors(colors::RED, array![false, true, false].view());
        assert_eq!(mesh.colors, array![[255_u8, 255, 0], [255, 0, 0], [255, 255, 0]]);
    }

    #[test]
    fn shared_edges_are_listed_once() {
        let mesh = ColoredMesh::new("quad", nd::Array2::zeros((4, 3)), array![[0_u32, 1, 2], [0, 2, 3]], colors::WHITE);
        assert_eq!(mesh.edges(), vec![[0, 1], [0, 2], [0, 3], [1, 2], [2, 3]]);
    }

    #[test]
    fn icosphere_is_on_the_unit_sphere() {
        let (verts, faces) = icosphere(1);
        assert_eq!((verts.nrows(), faces.nrows()), (42, 80));
        for v in verts.outer_iter() {
            assert_relative_eq!(v.dot(&v), 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn spheres_are_centered_on_points() {
        let points = array![[0.0_f32, 0.0, 0.0], [1.0, 2.0, 3.0]];
        let mesh = points_to_spheres("joints", points.view(), 0.004, colors::GREEN);
        assert_eq!(mesh.num_verts(), 84);
        let second = mesh.verts.slice(nd::s![42.., ..]);
        let center = second.mean_axis(nd::Axis(0)).unwrap();
        assert_relative_eq!(center[0], 1.0, epsilon = 1e-4);
        assert_relative_eq!(center[2], 3.0, epsilon = 1e-4);
        assert!(mesh.faces.iter().all(|&f| (f as usize) < mesh.num_verts()));
    }

    #[test]
    fn palette_lookup() {
        assert_eq!(colors::by_name("Yellow"), Some(colors::YELLOW));
        assert_eq!(colors::by_name("teal"), None);
    }
}
