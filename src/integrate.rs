use glam::Vec3;
use rayon::prelude::*;

use crate::camera::Camera;
use crate::depth::DepthImage;
use crate::error::FusionError;
use crate::volume::TsdfVolume;

/// Fuse one registered depth frame into the volume.
///
/// Every voxel is projected into the depth image through the camera's
/// inverse pose; voxels that land on a valid measurement within the
/// truncation band receive a weighted running-average update
/// (`w_new = 1`, weight saturating at the volume maximum). Voxels behind
/// the camera, outside the image, on invalid (zero) depth pixels or more
/// than one truncation distance behind the surface are skipped, so a blank
/// frame leaves the volume untouched.
///
/// The voxel sweep is partitioned across z-slices with rayon; each voxel is
/// written by exactly one thread and the result does not depend on the
/// schedule.
///
/// # Errors
///
/// `InvalidInput` when the depth image dimensions disagree with the camera
/// intrinsics.
pub fn integrate(
    volume: &mut TsdfVolume,
    depth: &DepthImage,
    camera: &Camera,
) -> Result<(), FusionError> {
    let intr = camera.intrinsics();
    if depth.width() != intr.width || depth.height() != intr.height {
        return Err(FusionError::InvalidInput(format!(
            "depth image is {}x{} but the camera expects {}x{}",
            depth.width(),
            depth.height(),
            intr.width,
            intr.height
        )));
    }

    let [nx, ny, _] = volume.dims();
    let origin = volume.origin();
    let voxel_size = volume.voxel_size();
    let trunc = volume.trunc();
    let max_weight = volume.max_weight();
    let slice_len = nx * ny;

    let updated: usize = volume
        .voxels_mut()
        .par_chunks_mut(slice_len)
        .enumerate()
        .map(|(k, slice)| {
            let mut updated = 0usize;
            for j in 0..ny {
                for i in 0..nx {
                    let center = origin
                        + Vec3::new(i as f32 + 0.5, j as f32 + 0.5, k as f32 + 0.5) * voxel_size;
                    let (u, v, z_cam) = camera.world_to_pixel(center);
                    if z_cam <= 0.0 {
                        continue;
                    }
                    if u < 0.0 || v < 0.0 || u >= intr.width as f32 || v >= intr.height as f32 {
                        continue;
                    }
                    let d_meas = depth.get(u as u32, v as u32);
                    if d_meas == 0 {
                        continue;
                    }

                    let sdf = d_meas as f32 - z_cam;
                    if sdf < -trunc {
                        continue;
                    }
                    let tsdf = sdf.clamp(-trunc, trunc) / trunc;

                    let voxel = &mut slice[i + nx * j];
                    let w = voxel.weight;
                    voxel.distance = (voxel.distance * w + tsdf) / (w + 1.0);
                    voxel.weight = (w + 1.0).min(max_weight);
                    updated += 1;
                }
            }
            updated
        })
        .sum();

    log::debug!(
        "integrated {}x{} depth frame: {updated}/{} voxels updated",
        depth.width(),
        depth.height(),
        volume.num_voxels()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraIntrinsics;
    use approx::assert_relative_eq;

    fn test_camera(width: u32, height: u32) -> Camera {
        let cx = width as f32 / 2.0;
        let cy = height as f32 / 2.0;
        let intr = CameraIntrinsics::new(100.0, 100.0, cx, cy, width, height).unwrap();
        Camera::new(intr)
    }

    fn test_volume() -> TsdfVolume {
        // 1 m cube in front of the camera, 50 mm voxels.
        TsdfVolume::new(
            [20, 20, 20],
            Vec3::splat(1000.0),
            Vec3::new(-500.0, -500.0, 500.0),
            150.0,
            32.0,
        )
        .unwrap()
    }

    #[test]
    fn test_dimension_mismatch_is_rejected() {
        let mut volume = test_volume();
        let camera = test_camera(64, 48);
        let data = vec![1000u16; 32 * 32];
        let depth = DepthImage::new(32, 32, &data).unwrap();
        assert!(matches!(
            integrate(&mut volume, &depth, &camera),
            Err(FusionError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_blank_frame_leaves_volume_unchanged() {
        let mut volume = test_volume();
        let camera = test_camera(64, 48);
        let data = vec![0u16; 64 * 48];
        let depth = DepthImage::new(64, 48, &data).unwrap();
        integrate(&mut volume, &depth, &camera).unwrap();
        assert!(volume.voxels().iter().all(|v| !v.is_seen()));
    }

    #[test]
    fn test_constant_plane_frame() {
        let mut volume = test_volume();
        let camera = test_camera(64, 48);
        let data = vec![1000u16; 64 * 48];
        let depth = DepthImage::new(64, 48, &data).unwrap();
        integrate(&mut volume, &depth, &camera).unwrap();

        // Voxels straddling z = 1000 mm hold a near-zero tsdf with weight 1;
        // voxels well in front of the plane are free space (tsdf = 1).
        let mut seen = 0usize;
        for k in 0..20 {
            for j in 0..20 {
                for i in 0..20 {
                    let v = volume.at(i, j, k);
                    if !v.is_seen() {
                        continue;
                    }
                    seen += 1;
                    assert!(v.distance.abs() <= 1.0);
                    assert_relative_eq!(v.weight, 1.0);
                    let z = volume.voxel_center(i, j, k).z;
                    if (z - 1000.0).abs() < 20.0 {
                        assert!(v.distance.abs() < 0.2, "tsdf {} at z {}", v.distance, z);
                    }
                    if z < 1000.0 - 200.0 {
                        assert_relative_eq!(v.distance, 1.0);
                    }
                }
            }
        }
        assert!(seen > 0, "no voxel was updated");
    }

    #[test]
    fn test_weight_saturates_at_max() {
        let mut volume = TsdfVolume::new(
            [8, 8, 8],
            Vec3::splat(400.0),
            Vec3::new(-200.0, -200.0, 800.0),
            100.0,
            3.0,
        )
        .unwrap();
        let camera = test_camera(32, 32);
        let data = vec![1000u16; 32 * 32];
        let depth = DepthImage::new(32, 32, &data).unwrap();
        for _ in 0..5 {
            integrate(&mut volume, &depth, &camera).unwrap();
        }
        for v in volume.voxels() {
            assert!(v.weight <= 3.0);
            if v.is_seen() {
                assert!(v.distance.abs() <= 1.0);
            }
        }
    }

    #[test]
    fn test_voxels_behind_surface_beyond_truncation_are_skipped() {
        let mut volume = test_volume();
        let camera = test_camera(64, 48);
        // Surface at 700 mm; the far half of the volume sits more than one
        // truncation distance behind it and must stay unseen.
        let data = vec![700u16; 64 * 48];
        let depth = DepthImage::new(64, 48, &data).unwrap();
        integrate(&mut volume, &depth, &camera).unwrap();

        for k in 0..20 {
            for j in 0..20 {
                for i in 0..20 {
                    let z = volume.voxel_center(i, j, k).z;
                    if z > 700.0 + 160.0 {
                        assert!(!volume.at(i, j, k).is_seen(), "voxel at z {z} was updated");
                    }
                }
            }
        }
    }
}
