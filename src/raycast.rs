use glam::Vec3;
use rayon::prelude::*;

use crate::camera::{Camera, Ray};
use crate::volume::TsdfVolume;

/// Fraction of the smallest voxel dimension used as the marching step.
const STEP_FRACTION: f32 = 0.5;

/// Per-pixel vertex and normal maps produced by a raycast.
///
/// Both buffers are `width * height` long in row-major order. Pixels whose
/// ray never crossed the surface hold the `Vec3::NAN` sentinel in both
/// maps.
#[derive(Debug, Clone)]
pub struct RaycastImages {
    width: u32,
    height: u32,
    vertices: Vec<Vec3>,
    normals: Vec<Vec3>,
}

impl RaycastImages {
    fn sentinel(width: u32, height: u32) -> Self {
        let n = width as usize * height as usize;
        Self {
            width,
            height,
            vertices: vec![Vec3::NAN; n],
            normals: vec![Vec3::NAN; n],
        }
    }

    /// Image width in pixels.
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Image height in pixels.
    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row-major world-space vertex map.
    #[inline]
    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    /// Row-major world-space unit normal map.
    #[inline]
    pub fn normals(&self) -> &[Vec3] {
        &self.normals
    }

    /// Whether the ray through pixel (u, v) hit the surface.
    #[inline]
    pub fn is_hit(&self, u: u32, v: u32) -> bool {
        self.vertex(u, v).is_finite()
    }

    /// World-space vertex at pixel (u, v); NaN sentinel on a miss.
    #[inline]
    pub fn vertex(&self, u: u32, v: u32) -> Vec3 {
        debug_assert!(u < self.width && v < self.height);
        self.vertices[v as usize * self.width as usize + u as usize]
    }

    /// World-space unit normal at pixel (u, v); NaN sentinel on a miss.
    #[inline]
    pub fn normal(&self, u: u32, v: u32) -> Vec3 {
        debug_assert!(u < self.width && v < self.height);
        self.normals[v as usize * self.width as usize + u as usize]
    }

    /// Number of pixels whose ray hit the surface.
    pub fn num_hits(&self) -> usize {
        self.vertices.iter().filter(|v| v.is_finite()).count()
    }
}

/// Surface raycasting over a TSDF volume.
///
/// Implementations share one per-pixel contract and differ only in how the
/// pixel grid is scheduled; given the same volume and camera they produce
/// bit-identical images.
pub trait Raycaster {
    /// Cast one ray per pixel of the camera image and return vertex and
    /// normal maps with NaN sentinels for misses.
    fn raycast(&self, volume: &TsdfVolume, camera: &Camera) -> RaycastImages;
}

/// Sequential reference raycaster.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScalarRaycaster;

impl Raycaster for ScalarRaycaster {
    fn raycast(&self, volume: &TsdfVolume, camera: &Camera) -> RaycastImages {
        let mut images = RaycastImages::sentinel(camera.intrinsics().width, camera.intrinsics().height);
        let width = images.width as usize;
        for v in 0..images.height {
            let row = v as usize * width;
            for u in 0..images.width {
                if let Some((vertex, normal)) = cast_ray(volume, &camera.pixel_to_ray(u, v)) {
                    images.vertices[row + u as usize] = vertex;
                    images.normals[row + u as usize] = normal;
                }
            }
        }
        log_hits(&images);
        images
    }
}

/// Rayon raycaster, one image row per task.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParallelRaycaster;

impl Raycaster for ParallelRaycaster {
    fn raycast(&self, volume: &TsdfVolume, camera: &Camera) -> RaycastImages {
        let mut images = RaycastImages::sentinel(camera.intrinsics().width, camera.intrinsics().height);
        let width = images.width as usize;
        images
            .vertices
            .par_chunks_mut(width)
            .zip(images.normals.par_chunks_mut(width))
            .enumerate()
            .for_each(|(v, (vertex_row, normal_row))| {
                for u in 0..width {
                    if let Some((vertex, normal)) =
                        cast_ray(volume, &camera.pixel_to_ray(u as u32, v as u32))
                    {
                        vertex_row[u] = vertex;
                        normal_row[u] = normal;
                    }
                }
            });
        log_hits(&images);
        images
    }
}

fn log_hits(images: &RaycastImages) {
    log::debug!(
        "raycast {}x{}: {} hits",
        images.width,
        images.height,
        images.num_hits()
    );
}

/// March a single ray through the volume to its first front-facing
/// zero-crossing.
///
/// Returns the world-space hit point and a unit normal oriented from
/// negative distances towards positive ones (the observed side), or `None`
/// when the ray misses the volume or never crosses the surface.
fn cast_ray(volume: &TsdfVolume, ray: &Ray) -> Option<(Vec3, Vec3)> {
    let (t_near, t_far) = clip_to_aabb(volume, ray)?;
    let step = STEP_FRACTION * volume.voxel_size().min_element();

    let mut t = t_near.max(0.0);
    let mut prev: Option<(f32, f32)> = None;
    while t <= t_far {
        match volume.trilinear_distance(ray.point_at(t)) {
            // Unobserved region: forget the running sample so a crossing is
            // never interpolated across it.
            None => prev = None,
            Some(d) => {
                if d <= 0.0 {
                    if let Some((t_prev, d_prev)) = prev {
                        if d_prev > 0.0 {
                            // Front-facing crossing; refine linearly.
                            let t_hit = t_prev + (t - t_prev) * d_prev / (d_prev - d);
                            return Some(surface_sample(volume, ray, t_hit));
                        }
                    } else if d == 0.0 {
                        // First defined sample already sits on the surface.
                        return Some(surface_sample(volume, ray, t));
                    }
                }
                prev = Some((t, d));
            }
        }
        t += step;
    }
    None
}

fn surface_sample(volume: &TsdfVolume, ray: &Ray, t_hit: f32) -> (Vec3, Vec3) {
    let vertex = ray.point_at(t_hit);
    let normal = match volume.distance_gradient(vertex) {
        Some(g) if g.length_squared() > f32::EPSILON => g.normalize(),
        // Flat or border gradient: fall back to facing the camera.
        _ => -ray.direction,
    };
    (vertex, normal)
}

/// Slab intersection of the ray with the volume bounds.
///
/// Returns `(t_near, t_far)` or `None` when the volume is entirely behind
/// the ray or missed.
fn clip_to_aabb(volume: &TsdfVolume, ray: &Ray) -> Option<(f32, f32)> {
    let (lo, hi) = volume.aabb();
    let mut t_near = f32::NEG_INFINITY;
    let mut t_far = f32::INFINITY;
    for axis in 0..3 {
        let o = ray.origin[axis];
        let d = ray.direction[axis];
        if d.abs() < 1e-12 {
            if o < lo[axis] || o > hi[axis] {
                return None;
            }
            continue;
        }
        let mut t0 = (lo[axis] - o) / d;
        let mut t1 = (hi[axis] - o) / d;
        if t0 > t1 {
            std::mem::swap(&mut t0, &mut t1);
        }
        t_near = t_near.max(t0);
        t_far = t_far.min(t1);
    }
    if t_far <= t_near.max(0.0) {
        return None;
    }
    Some((t_near, t_far))
}
