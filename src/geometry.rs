use glam::Vec3;
use log::warn;

use crate::gpu::VertexLayout;

/// Interleaved vertex and index arrays ready for [`crate::render::Mesh::new`].
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    pub vertices: Vec<f32>,
    pub indices: Vec<u32>,
    pub layout: VertexLayout,
}

const PYRAMID_POSITIONS_UVS: [[f32; 5]; 5] = [
    [-1.0, -1.0, 0.0, 0.0, 0.0],
    [0.0, -1.0, 1.0, 1.0, 0.0],
    [1.0, -1.0, 0.0, 0.0, 0.0],
    [0.0, -1.0, -1.0, 1.0, 0.0],
    [0.0, 1.0, 0.0, 0.5, 1.0],
];

const PYRAMID_INDICES: [u32; 21] = [
    0, 4, 1, //
    1, 4, 2, //
    2, 4, 0, //
    0, 1, 2, //
    2, 3, 4, //
    4, 0, 3, //
    3, 2, 0,
];

/// The demo pyramid: five shared vertices with position, uv and averaged normals.
pub fn pyramid() -> Geometry {
    let mut vertices = Vec::with_capacity(PYRAMID_POSITIONS_UVS.len() * 8);
    for vertex in PYRAMID_POSITIONS_UVS {
        vertices.extend_from_slice(&vertex);
        vertices.extend_from_slice(&[0.0; 3]);
    }
    let layout = VertexLayout::lit();
    compute_average_normals(&mut vertices, &PYRAMID_INDICES, &layout);
    Geometry {
        vertices,
        indices: PYRAMID_INDICES.to_vec(),
        layout,
    }
}

/// The pyramid with positions only, for the unlit shader.
pub fn pyramid_positions() -> Geometry {
    let vertices = PYRAMID_POSITIONS_UVS
        .iter()
        .flat_map(|vertex| vertex[..3].iter().copied())
        .collect();
    Geometry {
        vertices,
        indices: PYRAMID_INDICES.to_vec(),
        layout: VertexLayout::position_only(),
    }
}

/// Overwrites each vertex normal with the normalised sum of the face normals
/// of every triangle that references it.
///
/// Positions are the first three floats of a vertex and the normal the last
/// three. Degenerate triangles contribute nothing; a vertex touched only by
/// degenerate triangles ends up with a zero normal. Layouts narrower than six
/// floats are left untouched.
///
/// Triangles referencing a vertex past the end of `vertices` are skipped with
/// a warning; the number skipped is returned.
pub fn compute_average_normals(
    vertices: &mut [f32],
    indices: &[u32],
    layout: &VertexLayout,
) -> usize {
    let stride = layout.floats_per_vertex();
    if stride < 6 {
        return 0;
    }
    let normal_offset = stride - 3;
    let vertex_count = vertices.len() / stride;
    let position = |vertices: &[f32], index: usize| {
        let base = index * stride;
        Vec3::new(vertices[base], vertices[base + 1], vertices[base + 2])
    };

    let mut accum = vec![Vec3::ZERO; vertex_count];
    let mut skipped = 0;
    for triangle in indices.chunks_exact(3) {
        let [i0, i1, i2] = [triangle[0], triangle[1], triangle[2]].map(|i| i as usize);
        if i0 >= vertex_count || i1 >= vertex_count || i2 >= vertex_count {
            skipped += 1;
            continue;
        }
        let p0 = position(vertices, i0);
        let normal = (position(vertices, i1) - p0).cross(position(vertices, i2) - p0);
        if normal.length_squared() > f32::EPSILON {
            let normal = normal.normalize();
            accum[i0] += normal;
            accum[i1] += normal;
            accum[i2] += normal;
        }
    }

    for (i, normal) in accum.into_iter().enumerate() {
        let normal = normal.normalize_or_zero();
        let base = i * stride + normal_offset;
        vertices[base..base + 3].copy_from_slice(&normal.to_array());
    }
    if skipped > 0 {
        warn!(
            "skipped {skipped} triangle(s) indexing past {vertex_count} vertices while averaging normals"
        );
    }
    skipped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normal(geometry: &Geometry, index: usize) -> Vec3 {
        let base = index * 8 + 5;
        Vec3::from_slice(&geometry.vertices[base..base + 3])
    }

    #[test]
    fn pyramid_matches_the_lit_layout() {
        let geometry = pyramid();
        assert_eq!(geometry.vertices.len(), 5 * 8);
        assert_eq!(geometry.indices.len(), 21);
        assert_eq!(geometry.layout, VertexLayout::lit());
        for i in 0..5 {
            assert!((normal(&geometry, i).length() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn normals_are_averaged_over_shared_faces() {
        // Two triangles in the XY plane sharing an edge.
        let mut vertices = vec![
            0.0, 0.0, 0.0, 0.0, 0.0, 0.0, //
            1.0, 0.0, 0.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, 0.0, 0.0, //
            1.0, 1.0, 0.0, 0.0, 0.0, 0.0,
        ];
        let layout = VertexLayout::packed(&[3, 3]);
        compute_average_normals(&mut vertices, &[0, 1, 2, 1, 3, 2], &layout);
        for chunk in vertices.chunks_exact(6) {
            assert_eq!(Vec3::from_slice(&chunk[3..]), Vec3::Z);
        }
    }

    #[test]
    fn degenerate_triangles_leave_zero_normals() {
        let mut vertices = vec![
            0.0, 0.0, 0.0, 9.0, 9.0, 9.0, //
            1.0, 0.0, 0.0, 9.0, 9.0, 9.0, //
            2.0, 0.0, 0.0, 9.0, 9.0, 9.0,
        ];
        compute_average_normals(&mut vertices, &[0, 1, 2], &VertexLayout::packed(&[3, 3]));
        assert!(vertices.chunks_exact(6).all(|c| c[3..] == [0.0; 3]));
    }

    #[test]
    fn out_of_range_triangles_are_counted_and_skipped() {
        let mut vertices = vec![
            0.0, 0.0, 0.0, 0.0, 0.0, 0.0, //
            1.0, 0.0, 0.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, 0.0, 0.0,
        ];
        let layout = VertexLayout::packed(&[3, 3]);
        let indices = [0, 1, 2, 0, 1, 7, 9, 1, 2];
        assert_eq!(compute_average_normals(&mut vertices, &indices, &layout), 2);
        for chunk in vertices.chunks_exact(6) {
            assert_eq!(Vec3::from_slice(&chunk[3..]), Vec3::Z);
        }
        assert_eq!(compute_average_normals(&mut vertices, &[0, 1, 2], &layout), 0);
    }

    #[test]
    fn positions_only_variant_shares_indices() {
        let geometry = pyramid_positions();
        assert_eq!(geometry.vertices.len(), 15);
        assert_eq!(geometry.indices, pyramid().indices);
        assert_eq!(geometry.layout, VertexLayout::position_only());
    }
}
