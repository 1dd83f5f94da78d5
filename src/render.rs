//! Pixel buffers for visualising raycast output.
//!
//! Only the buffers are produced here; encoding them to an image file is
//! left to the caller's image library.

use glam::Vec3;

use crate::raycast::RaycastImages;

/// Map the normal image to RGB, component-wise `(n + 1) / 2 * 255`.
///
/// Missed pixels come out black.
pub fn normals_to_rgb(images: &RaycastImages) -> Vec<[u8; 3]> {
    images
        .normals()
        .iter()
        .map(|n| {
            if !n.is_finite() {
                return [0, 0, 0];
            }
            let c = (*n + Vec3::ONE) * 0.5 * 255.0;
            [c.x as u8, c.y as u8, c.z as u8]
        })
        .collect()
}

/// Shade the surface with a point light using the Lambertian model.
///
/// Per pixel: `intensity = max(0, n . normalize(light - v))`, scaled to a
/// grey byte. Missed pixels are 0.
pub fn shade_lambertian(images: &RaycastImages, light: Vec3) -> Vec<u8> {
    images
        .vertices()
        .iter()
        .zip(images.normals())
        .map(|(v, n)| {
            if !v.is_finite() || !n.is_finite() {
                return 0;
            }
            let to_light = (light - *v).normalize_or_zero();
            (n.dot(to_light).max(0.0) * 255.0) as u8
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{Camera, CameraIntrinsics};
    use crate::raycast::{Raycaster, ScalarRaycaster};
    use crate::volume::{TsdfVolume, Voxel};

    /// Raycast a small analytic plane so the images contain both hits and
    /// misses.
    fn plane_images() -> RaycastImages {
        let mut vol = TsdfVolume::new(
            [16, 16, 16],
            Vec3::splat(800.0),
            Vec3::new(-400.0, -400.0, 600.0),
            100.0,
            8.0,
        )
        .unwrap();
        let [nx, ny, nz] = vol.dims();
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let z = vol.voxel_center(i, j, k).z;
                    *vol.at_mut(i, j, k) = Voxel {
                        distance: ((1000.0 - z) / 100.0).clamp(-1.0, 1.0),
                        weight: 1.0,
                    };
                }
            }
        }
        let intr = CameraIntrinsics::new(40.0, 40.0, 16.0, 12.0, 32, 24).unwrap();
        ScalarRaycaster.raycast(&vol, &Camera::new(intr))
    }

    #[test]
    fn test_normal_colours() {
        let images = plane_images();
        let rgb = normals_to_rgb(&images);
        assert_eq!(rgb.len(), 32 * 24);

        let center = 12 * 32 + 16;
        assert!(images.is_hit(16, 12));
        // Normal is close to (0, 0, -1): half-intensity red and green,
        // near-zero blue.
        let [r, g, b] = rgb[center];
        assert!((126..=128).contains(&r));
        assert!((126..=128).contains(&g));
        assert!(b <= 1);
    }

    #[test]
    fn test_misses_are_black() {
        let images = plane_images();
        let rgb = normals_to_rgb(&images);
        let grey = shade_lambertian(&images, Vec3::new(0.0, 0.0, 0.0));
        for idx in 0..rgb.len() {
            let u = (idx % 32) as u32;
            let v = (idx / 32) as u32;
            if !images.is_hit(u, v) {
                assert_eq!(rgb[idx], [0, 0, 0]);
                assert_eq!(grey[idx], 0);
            }
        }
    }

    #[test]
    fn test_head_on_light_is_bright() {
        let images = plane_images();
        // Light at the camera: the plane faces it almost head on.
        let grey = shade_lambertian(&images, Vec3::ZERO);
        let center = 12 * 32 + 16;
        assert!(grey[center] > 240, "centre intensity {}", grey[center]);
    }

    #[test]
    fn test_light_behind_surface_is_dark() {
        let images = plane_images();
        let grey = shade_lambertian(&images, Vec3::new(0.0, 0.0, 5000.0));
        let center = 12 * 32 + 16;
        assert_eq!(grey[center], 0);
    }
}
