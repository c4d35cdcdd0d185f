//! Built-in meshes and the fallback texture.

use glam::{Vec2, Vec3};
use orrery_render::{MeshData, Vertex};

/// Unit cube centred on the origin, one colour per face pair.
pub fn cube() -> MeshData {
    // (normal, tangent u, tangent v, colour)
    let faces = [
        (Vec3::X, Vec3::NEG_Z, Vec3::Y, Vec3::new(0.8, 0.8, 0.1)),
        (Vec3::NEG_X, Vec3::Z, Vec3::Y, Vec3::new(0.9, 0.9, 0.9)),
        (Vec3::Y, Vec3::X, Vec3::NEG_Z, Vec3::new(0.9, 0.6, 0.1)),
        (Vec3::NEG_Y, Vec3::X, Vec3::Z, Vec3::new(0.8, 0.1, 0.1)),
        (Vec3::Z, Vec3::X, Vec3::Y, Vec3::new(0.1, 0.1, 0.8)),
        (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y, Vec3::new(0.1, 0.8, 0.1)),
    ];

    let mut data = MeshData::default();
    for (normal, u, v, color) in faces {
        let base = data.vertices.len() as u32;
        let centre = normal * 0.5;
        for (su, sv) in [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)] {
            let position = centre + u * su + v * sv;
            let uv = Vec2::new(su + 0.5, 0.5 - sv);
            data.vertices.push(Vertex::new(position, color, normal, uv));
        }
        data.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    data
}

/// Square in the XZ plane facing +Y, with the texture repeated `repeat` times.
pub fn plane(repeat: f32) -> MeshData {
    let corners = [(-0.5, 0.5), (0.5, 0.5), (0.5, -0.5), (-0.5, -0.5)];
    let vertices = corners
        .iter()
        .map(|&(x, z)| {
            Vertex::new(
                Vec3::new(x, 0.0, z),
                Vec3::ONE,
                Vec3::Y,
                Vec2::new((x + 0.5) * repeat, (0.5 - z) * repeat),
            )
        })
        .collect();
    MeshData {
        vertices,
        indices: vec![0, 1, 2, 0, 2, 3],
    }
}

/// Arrow from the origin to `(0, 1, 0)`: a square shaft and a pyramid head.
pub fn arrow() -> MeshData {
    const SHAFT: f32 = 0.04;
    const HEAD: f32 = 0.12;
    const HEAD_START: f32 = 0.7;

    let color = Vec3::new(0.3, 0.8, 1.0);
    let mut data = MeshData::default();

    let quad = |data: &mut MeshData, corners: [Vec3; 4]| {
        let normal = (corners[1] - corners[0])
            .cross(corners[2] - corners[0])
            .normalize_or_zero();
        let base = data.vertices.len() as u32;
        for (corner, uv) in corners.iter().zip([Vec2::ZERO, Vec2::X, Vec2::ONE, Vec2::Y]) {
            data.vertices.push(Vertex::new(*corner, color, normal, uv));
        }
        data.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    };

    let ring = |half: f32, y: f32| {
        [
            Vec3::new(-half, y, half),
            Vec3::new(half, y, half),
            Vec3::new(half, y, -half),
            Vec3::new(-half, y, -half),
        ]
    };

    let bottom = ring(SHAFT, 0.0);
    let top = ring(SHAFT, HEAD_START);
    for i in 0..4 {
        let j = (i + 1) % 4;
        quad(&mut data, [bottom[i], bottom[j], top[j], top[i]]);
    }

    let collar = ring(HEAD, HEAD_START);
    quad(&mut data, [collar[3], collar[2], collar[1], collar[0]]);

    let tip = Vec3::Y;
    for i in 0..4 {
        let j = (i + 1) % 4;
        let normal = (collar[j] - collar[i])
            .cross(tip - collar[i])
            .normalize_or_zero();
        let base = data.vertices.len() as u32;
        data.vertices.push(Vertex::new(collar[i], color, normal, Vec2::ZERO));
        data.vertices.push(Vertex::new(collar[j], color, normal, Vec2::X));
        data.vertices.push(Vertex::new(tip, color, normal, Vec2::new(0.5, 1.0)));
        data.indices.extend_from_slice(&[base, base + 1, base + 2]);
    }

    data
}

/// RGBA8 checkerboard with `cells` squares per side.
pub fn checker(size: u32, cells: u32) -> Vec<u8> {
    let cell = (size / cells.max(1)).max(1);
    let mut pixels = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let light = ((x / cell) + (y / cell)) % 2 == 0;
            let shade = if light { 220 } else { 70 };
            pixels.extend_from_slice(&[shade, shade, shade, 255]);
        }
    }
    pixels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_in_meshes_are_valid() {
        for mesh in [cube(), plane(4.0), arrow()] {
            assert!(mesh.validate().is_ok());
            assert_eq!(mesh.indices.len() % 3, 0);
        }
    }

    #[test]
    fn cube_faces_point_outwards() {
        let cube = cube();
        assert_eq!(cube.vertices.len(), 24);
        for vertex in &cube.vertices {
            let position = Vec3::from(vertex.position);
            let normal = Vec3::from(vertex.normal);
            assert!((position.dot(normal) - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn arrow_spans_unit_height() {
        let arrow = arrow();
        let (min, max) = arrow
            .vertices
            .iter()
            .map(|v| v.position[1])
            .fold((f32::MAX, f32::MIN), |(lo, hi), y| (lo.min(y), hi.max(y)));
        assert!(min.abs() < 1e-6);
        assert!((max - 1.0).abs() < 1e-6);
    }

    #[test]
    fn checker_alternates_cells() {
        let pixels = checker(4, 2);
        assert_eq!(pixels.len(), 4 * 4 * 4);
        let at = |x: usize, y: usize| pixels[(y * 4 + x) * 4];
        assert_eq!(at(0, 0), at(1, 1));
        assert_ne!(at(0, 0), at(2, 0));
        assert_ne!(at(0, 0), at(0, 2));
        assert!(orrery_render::texture::check_rgba8(4, 4, &pixels).is_ok());
    }
}
