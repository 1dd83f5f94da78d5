use glam::Vec3;
use rayon::prelude::*;

use crate::tables::{CUBE_CORNERS, CUBE_EDGES, MC_EDGE_TABLE, MC_TRIANGLE_TABLE};
use crate::volume::TsdfVolume;

/// A world-space triangle with per-vertex normals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    /// Vertex positions in millimetres.
    pub vertices: [Vec3; 3],
    /// Unit normals, oriented from negative TSDF towards positive.
    pub normals: [Vec3; 3],
}

/// Polygonise the zero level set of the volume with marching cubes.
///
/// Cubes are indexed by their minimum corner voxel; a cube touching any
/// unseen voxel emits nothing, so unobserved regions stay unmeshed. The
/// sweep is parallel over z slabs with per-slab buffers concatenated in z
/// order, so repeated runs over the same volume return the same triangle
/// sequence. An all-inside or all-outside volume yields an empty vector.
pub fn extract_triangles(volume: &TsdfVolume) -> Vec<Triangle> {
    let [nx, ny, nz] = volume.dims();
    if nx < 2 || ny < 2 || nz < 2 {
        return Vec::new();
    }

    let slabs: Vec<Vec<Triangle>> = (0..nz - 1)
        .into_par_iter()
        .map(|k| {
            let mut triangles = Vec::new();
            for j in 0..ny - 1 {
                for i in 0..nx - 1 {
                    march_cube(volume, i, j, k, &mut triangles);
                }
            }
            triangles
        })
        .collect();

    let triangles: Vec<Triangle> = slabs.into_iter().flatten().collect();
    log::debug!("marching cubes over {nx}x{ny}x{nz} volume: {} triangles", triangles.len());
    triangles
}

/// Emit the triangles of one cube into `out`.
fn march_cube(volume: &TsdfVolume, i: usize, j: usize, k: usize, out: &mut Vec<Triangle>) {
    let mut distances = [0.0f32; 8];
    for (c, offset) in CUBE_CORNERS.iter().enumerate() {
        let voxel = volume.at(i + offset[0], j + offset[1], k + offset[2]);
        if !voxel.is_seen() {
            return;
        }
        distances[c] = voxel.distance;
    }

    let mut case = 0usize;
    for (c, &d) in distances.iter().enumerate() {
        if d < 0.0 {
            case |= 1 << c;
        }
    }
    let cut_edges = MC_EDGE_TABLE[case];
    if cut_edges == 0 {
        return;
    }

    // Intersections are computed once per cube and shared by all triangles
    // that reference the edge. Alongside the point we keep a fallback
    // normal, the unit vector from the edge's negative corner to its
    // positive one, used where the field gradient is unavailable.
    let mut edge_points: [Option<(Vec3, Vec3)>; 12] = [None; 12];
    for (e, &(a, b)) in CUBE_EDGES.iter().enumerate() {
        if cut_edges & (1 << e) == 0 {
            continue;
        }
        let pa = corner_position(volume, i, j, k, a);
        let pb = corner_position(volume, i, j, k, b);
        let (da, db) = (distances[a], distances[b]);
        let t = if (da - db).abs() < 1e-12 {
            0.5
        } else {
            (da / (da - db)).clamp(0.0, 1.0)
        };
        let point = pa + (pb - pa) * t;
        let towards_positive = if da < 0.0 { pb - pa } else { pa - pb };
        edge_points[e] = Some((point, towards_positive.normalize()));
    }

    let row = &MC_TRIANGLE_TABLE[case];
    let mut cursor = 0;
    while row[cursor] >= 0 {
        let mut vertices = [Vec3::ZERO; 3];
        let mut normals = [Vec3::ZERO; 3];
        for v in 0..3 {
            let (point, fallback) = edge_points[row[cursor + v] as usize]
                .expect("triangle table references an uncut edge");
            vertices[v] = point;
            normals[v] = match volume.distance_gradient(point) {
                Some(g) if g.length_squared() > f32::EPSILON => g.normalize(),
                _ => fallback,
            };
        }

        // The normals already point from inside to outside; re-wind the
        // triangle whenever its cross-product normal disagrees.
        let face = (vertices[1] - vertices[0]).cross(vertices[2] - vertices[0]);
        let reference = normals[0] + normals[1] + normals[2];
        if face.dot(reference) < 0.0 {
            vertices.swap(1, 2);
            normals.swap(1, 2);
        }

        out.push(Triangle { vertices, normals });
        cursor += 3;
    }
}

#[inline]
fn corner_position(volume: &TsdfVolume, i: usize, j: usize, k: usize, corner: usize) -> Vec3 {
    let o = CUBE_CORNERS[corner];
    volume.voxel_center(i + o[0], j + o[1], k + o[2])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::Voxel;
    use approx::assert_relative_eq;

    /// A 2x2x2 micro volume whose corner signs follow `case`.
    fn micro_volume(case: usize) -> TsdfVolume {
        let mut vol = TsdfVolume::new(
            [2, 2, 2],
            Vec3::splat(2.0),
            Vec3::ZERO,
            1.0,
            8.0,
        )
        .unwrap();
        for (c, offset) in CUBE_CORNERS.iter().enumerate() {
            let inside = case & (1 << c) != 0;
            *vol.at_mut(offset[0], offset[1], offset[2]) = Voxel {
                distance: if inside { -1.0 } else { 1.0 },
                weight: 1.0,
            };
        }
        vol
    }

    #[test]
    fn test_unseen_volume_emits_nothing() {
        let vol = TsdfVolume::new([8, 8, 8], Vec3::splat(8.0), Vec3::ZERO, 1.0, 8.0).unwrap();
        assert!(extract_triangles(&vol).is_empty());
    }

    #[test]
    fn test_uniform_volume_emits_nothing() {
        let mut vol = micro_volume(0);
        assert!(extract_triangles(&vol).is_empty());
        for v in vol.voxels_mut() {
            v.distance = -1.0;
        }
        assert!(extract_triangles(&vol).is_empty());
    }

    #[test]
    fn test_single_corner_case() {
        // Corner 0 inside: one triangle cutting edges 0, 3 and 8 at their
        // midpoints (distances are +-1).
        let vol = micro_volume(1);
        let triangles = extract_triangles(&vol);
        assert_eq!(triangles.len(), 1);

        let mut expected = vec![
            Vec3::new(1.0, 0.5, 0.5),  // edge 0: corner 0 -> 1
            Vec3::new(0.5, 1.0, 0.5),  // edge 3: corner 3 -> 0
            Vec3::new(0.5, 0.5, 1.0),  // edge 8: corner 0 -> 4
        ];
        for v in triangles[0].vertices {
            let pos = expected
                .iter()
                .position(|e| (*e - v).length() < 1e-6)
                .unwrap_or_else(|| panic!("unexpected vertex {v}"));
            expected.remove(pos);
        }
        assert!(expected.is_empty());

        // Normals point away from the inside corner at the volume origin.
        for n in triangles[0].normals {
            assert_relative_eq!(n.length(), 1.0, epsilon = 1e-5);
            assert!(n.dot(Vec3::ONE) > 0.0);
        }
    }

    #[test]
    fn test_winding_matches_normals() {
        for case in [1usize, 3, 7, 23, 105, 254] {
            let vol = micro_volume(case);
            for t in extract_triangles(&vol) {
                let face = (t.vertices[1] - t.vertices[0]).cross(t.vertices[2] - t.vertices[0]);
                let reference = t.normals[0] + t.normals[1] + t.normals[2];
                assert!(
                    face.dot(reference) >= 0.0,
                    "case {case}: winding disagrees with normals"
                );
            }
        }
    }

    #[test]
    fn test_all_cases_match_table_rows() {
        for case in 0..256usize {
            let vol = micro_volume(case);
            let triangles = extract_triangles(&vol);

            let row = &MC_TRIANGLE_TABLE[case];
            let expected_count = row.iter().take_while(|&&e| e >= 0).count() / 3;
            assert_eq!(triangles.len(), expected_count, "case {case}");

            // Each emitted triangle covers the same edge intersections as
            // the table row, independent of winding.
            for (t_idx, triangle) in triangles.iter().enumerate() {
                let mut expected: Vec<Vec3> = (0..3)
                    .map(|v| {
                        let e = row[t_idx * 3 + v] as usize;
                        let (a, b) = CUBE_EDGES[e];
                        let pa = Vec3::from_array(CUBE_CORNERS[a].map(|c| c as f32 + 0.5));
                        let pb = Vec3::from_array(CUBE_CORNERS[b].map(|c| c as f32 + 0.5));
                        (pa + pb) * 0.5
                    })
                    .collect();
                for v in triangle.vertices {
                    let pos = expected
                        .iter()
                        .position(|e| (*e - v).length() < 1e-5)
                        .unwrap_or_else(|| {
                            panic!("case {case} triangle {t_idx}: vertex {v} not in table row")
                        });
                    expected.remove(pos);
                }
            }
        }
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let vol = micro_volume(105);
        let a = extract_triangles(&vol);
        let b = extract_triangles(&vol);
        assert_eq!(a.len(), b.len());
        for (ta, tb) in a.iter().zip(&b) {
            assert_eq!(ta, tb);
        }
    }

    #[test]
    fn test_cube_with_unseen_corner_is_skipped() {
        let mut vol = micro_volume(1);
        vol.at_mut(1, 1, 1).weight = 0.0;
        assert!(extract_triangles(&vol).is_empty());
    }
}
