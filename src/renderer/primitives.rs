use std::f32::consts::PI;

use super::mesh::MeshData;
use super::vertex::{v, MeshVertex};

/// UV sphere of radius 1 with outward CCW winding.
pub fn sphere(segments: u32, rings: u32) -> MeshData {
    let segments = segments.max(3);
    let rings = rings.max(2);
    let mut vertices: Vec<MeshVertex> = Vec::with_capacity(((rings + 1) * (segments + 1)) as usize);
    let mut indices = Vec::with_capacity((rings * segments * 6) as usize);

    for ring in 0..=rings {
        let phi = PI * ring as f32 / rings as f32;
        let y = phi.cos();
        let ring_radius = phi.sin();

        for segment in 0..=segments {
            let theta = 2.0 * PI * segment as f32 / segments as f32;
            let pos = [ring_radius * theta.cos(), y, ring_radius * theta.sin()];
            let uv = [
                segment as f32 / segments as f32,
                ring as f32 / rings as f32,
            ];
            vertices.push(v(pos, pos, uv));
        }
    }

    for ring in 0..rings {
        for segment in 0..segments {
            let current = ring * (segments + 1) + segment;
            let below = current + segments + 1;
            indices.extend_from_slice(&[current, current + 1, below]);
            indices.extend_from_slice(&[current + 1, below + 1, below]);
        }
    }

    MeshData::single(vertices, indices)
}

/// Light volume for point lights: a coarse unit sphere.
pub fn light_volume() -> MeshData {
    sphere(16, 12)
}

/// Unit cube centered on the origin, four vertices per face.
pub fn cube() -> MeshData {
    // (normal, corner positions in CCW order seen from outside)
    const FACES: [([f32; 3], [[f32; 3]; 4]); 6] = [
        (
            [1.0, 0.0, 0.0],
            [[0.5, -0.5, -0.5], [0.5, 0.5, -0.5], [0.5, 0.5, 0.5], [0.5, -0.5, 0.5]],
        ),
        (
            [-1.0, 0.0, 0.0],
            [[-0.5, -0.5, 0.5], [-0.5, 0.5, 0.5], [-0.5, 0.5, -0.5], [-0.5, -0.5, -0.5]],
        ),
        (
            [0.0, 1.0, 0.0],
            [[-0.5, 0.5, -0.5], [-0.5, 0.5, 0.5], [0.5, 0.5, 0.5], [0.5, 0.5, -0.5]],
        ),
        (
            [0.0, -1.0, 0.0],
            [[-0.5, -0.5, 0.5], [-0.5, -0.5, -0.5], [0.5, -0.5, -0.5], [0.5, -0.5, 0.5]],
        ),
        (
            [0.0, 0.0, 1.0],
            [[0.5, -0.5, 0.5], [0.5, 0.5, 0.5], [-0.5, 0.5, 0.5], [-0.5, -0.5, 0.5]],
        ),
        (
            [0.0, 0.0, -1.0],
            [[-0.5, -0.5, -0.5], [-0.5, 0.5, -0.5], [0.5, 0.5, -0.5], [0.5, -0.5, -0.5]],
        ),
    ];
    const UVS: [[f32; 2]; 4] = [[0.0, 1.0], [0.0, 0.0], [1.0, 0.0], [1.0, 1.0]];

    let vertices = FACES
        .iter()
        .flat_map(|(normal, corners)| {
            corners
                .iter()
                .zip(UVS)
                .map(move |(corner, uv)| v(*corner, *normal, uv))
        })
        .collect();

    let indices = (0..6u32)
        .flat_map(|f| {
            let o = f * 4;
            [o, o + 1, o + 2, o, o + 2, o + 3]
        })
        .collect();

    MeshData::single(vertices, indices)
}

/// Flat square in the XZ plane facing +Y, `size` units across.
pub fn plane(size: f32) -> MeshData {
    let h = size * 0.5;
    let n = [0.0, 1.0, 0.0];
    let vertices = vec![
        v([-h, 0.0, -h], n, [0.0, 0.0]),
        v([-h, 0.0, h], n, [0.0, size]),
        v([h, 0.0, h], n, [size, size]),
        v([h, 0.0, -h], n, [size, 0.0]),
    ];
    MeshData::single(vertices, vec![0, 1, 2, 0, 2, 3])
}
