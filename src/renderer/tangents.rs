//! Per-vertex tangent frames for normal mapping.
//!
//! Lengyel, "Computing Tangent Space Basis Vectors for an Arbitrary Mesh".
//! Triangle contributions are accumulated per vertex, then each tangent is
//! Gram-Schmidt orthogonalized against the vertex normal. The w component
//! stores the bitangent handedness: `1.0` when
//! `dot(cross(n, t), bitangent_accum) < 0`, `-1.0` otherwise.

use glam::{Vec3, Vec4};

use crate::renderer::vertex::MeshVertex;

const DEGENERATE_UV_AREA: f32 = 1e-12;

/// Recomputes `tangent` for every vertex from positions, uvs and triangles.
///
/// Triangles referencing vertices out of range and triangles with a
/// degenerate uv mapping contribute nothing. Vertices that receive no usable
/// contribution get an arbitrary unit vector perpendicular to their normal.
pub fn compute_tangents(vertices: &mut [MeshVertex], indices: &[u32]) {
    let vertex_count = vertices.len();
    let mut tan1 = vec![Vec3::ZERO; vertex_count];
    let mut tan2 = vec![Vec3::ZERO; vertex_count];

    for tri in indices.chunks_exact(3) {
        let (i1, i2, i3) = (tri[0] as usize, tri[1] as usize, tri[2] as usize);
        if i1 >= vertex_count || i2 >= vertex_count || i3 >= vertex_count {
            continue;
        }

        let v1 = vertices[i1].position3();
        let v2 = vertices[i2].position3();
        let v3 = vertices[i3].position3();

        let w1 = vertices[i1].uv2();
        let w2 = vertices[i2].uv2();
        let w3 = vertices[i3].uv2();

        let e1 = v2 - v1;
        let e2 = v3 - v1;

        let s1 = w2.x - w1.x;
        let s2 = w3.x - w1.x;
        let t1 = w2.y - w1.y;
        let t2 = w3.y - w1.y;

        let det = s1 * t2 - s2 * t1;
        if det.abs() < DEGENERATE_UV_AREA {
            continue;
        }
        let r = 1.0 / det;

        let sdir = (e1 * t2 - e2 * t1) * r;
        let tdir = (e2 * s1 - e1 * s2) * r;

        for i in [i1, i2, i3] {
            tan1[i] += sdir;
            tan2[i] += tdir;
        }
    }

    for (a, vertex) in vertices.iter_mut().enumerate() {
        let n = vertex.normal3();
        let t = tan1[a];

        let ortho = (t - n * n.dot(t)).normalize_or_zero();
        let tangent = if ortho == Vec3::ZERO {
            fallback_tangent(n)
        } else {
            ortho
        };

        let handedness = if n.cross(t).dot(tan2[a]) < 0.0 {
            1.0
        } else {
            -1.0
        };

        vertex.tangent = Vec4::from((tangent, handedness)).to_array();
    }
}

fn fallback_tangent(normal: Vec3) -> Vec3 {
    let n = normal.normalize_or_zero();
    if n == Vec3::ZERO {
        Vec3::X
    } else {
        n.any_orthonormal_vector()
    }
}

/// Fills missing normals with area-weighted face normals.
pub fn compute_normals(vertices: &mut [MeshVertex], indices: &[u32]) {
    let vertex_count = vertices.len();
    let mut accum = vec![Vec3::ZERO; vertex_count];

    for tri in indices.chunks_exact(3) {
        let (i1, i2, i3) = (tri[0] as usize, tri[1] as usize, tri[2] as usize);
        if i1 >= vertex_count || i2 >= vertex_count || i3 >= vertex_count {
            continue;
        }
        let p1 = vertices[i1].position3();
        let face = (vertices[i2].position3() - p1).cross(vertices[i3].position3() - p1);
        accum[i1] += face;
        accum[i2] += face;
        accum[i3] += face;
    }

    for (vertex, n) in vertices.iter_mut().zip(accum) {
        let n = n.normalize_or_zero();
        let n = if n == Vec3::ZERO { Vec3::Y } else { n };
        vertex.normal = n.extend(0.0).to_array();
    }
}
