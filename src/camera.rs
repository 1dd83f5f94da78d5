use glam::{Mat3, Mat4, Vec3};

use crate::error::FusionError;

/// Intrinsic parameters of a pinhole camera.
///
/// The image size travels with the intrinsics so that every consumer of a
/// [`Camera`] agrees on the pixel lattice without passing dimensions around.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics {
    /// Focal length along x in pixels.
    pub fx: f32,
    /// Focal length along y in pixels.
    pub fy: f32,
    /// Principal point x in pixels.
    pub cx: f32,
    /// Principal point y in pixels.
    pub cy: f32,
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
}

impl CameraIntrinsics {
    /// Create a new set of intrinsics.
    ///
    /// # Arguments
    ///
    /// * `fx`, `fy` - Focal lengths in pixels, must be positive.
    /// * `cx`, `cy` - Principal point in pixels.
    /// * `width`, `height` - Image size in pixels, must be non-zero.
    pub fn new(
        fx: f32,
        fy: f32,
        cx: f32,
        cy: f32,
        width: u32,
        height: u32,
    ) -> Result<Self, FusionError> {
        if !(fx > 0.0 && fy > 0.0) || !fx.is_finite() || !fy.is_finite() {
            return Err(FusionError::InvalidCamera(format!(
                "focal lengths must be positive, got fx={fx} fy={fy}"
            )));
        }
        if width == 0 || height == 0 {
            return Err(FusionError::InvalidCamera(format!(
                "image size must be non-zero, got {width}x{height}"
            )));
        }
        Ok(Self {
            fx,
            fy,
            cx,
            cy,
            width,
            height,
        })
    }

    /// Number of pixels in the image plane.
    #[inline]
    pub fn num_pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// A ray in world space with a unit direction.
///
/// Rays are derived from a [`Camera`] per pixel and never stored.
#[derive(Debug, Clone, Copy)]
pub struct Ray {
    /// World-space origin, the camera centre.
    pub origin: Vec3,
    /// Unit direction in world space.
    pub direction: Vec3,
}

impl Ray {
    /// Point at parameter `t` along the ray.
    #[inline]
    pub fn point_at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}

/// A pinhole camera with a rigid pose.
///
/// The camera frame is +X right, +Y down, +Z forward into the scene; world
/// units are millimetres. The pose maps camera coordinates to world
/// coordinates; its inverse is cached and kept consistent by every mutator.
#[derive(Debug, Clone)]
pub struct Camera {
    intrinsics: CameraIntrinsics,
    pose: Mat4,
    inv_pose: Mat4,
}

/// Tolerance for the orthonormality check on externally supplied poses.
const POSE_TOLERANCE: f32 = 1e-3;

impl Camera {
    /// Create a camera at the world origin looking down +Z.
    pub fn new(intrinsics: CameraIntrinsics) -> Self {
        Self {
            intrinsics,
            pose: Mat4::IDENTITY,
            inv_pose: Mat4::IDENTITY,
        }
    }

    /// Borrow the intrinsics.
    #[inline]
    pub fn intrinsics(&self) -> &CameraIntrinsics {
        &self.intrinsics
    }

    /// The camera-to-world pose.
    #[inline]
    pub fn pose(&self) -> &Mat4 {
        &self.pose
    }

    /// The world-to-camera pose, always consistent with [`Camera::pose`].
    #[inline]
    pub fn inverse_pose(&self) -> &Mat4 {
        &self.inv_pose
    }

    /// World-space camera centre.
    #[inline]
    pub fn center(&self) -> Vec3 {
        self.pose.w_axis.truncate()
    }

    /// Replace the pose with an externally estimated one.
    ///
    /// The rotation block must be orthonormal with determinant one; the
    /// cached inverse is recomputed from the validated pose.
    pub fn set_pose(&mut self, pose: Mat4) -> Result<(), FusionError> {
        let rot = Mat3::from_mat4(pose);
        let should_be_identity = rot * rot.transpose();
        let max_dev = (0..3)
            .flat_map(|r| (0..3).map(move |c| (r, c)))
            .map(|(r, c)| {
                let expected = if r == c { 1.0 } else { 0.0 };
                (should_be_identity.col(c)[r] - expected).abs()
            })
            .fold(0.0f32, f32::max);
        if max_dev > POSE_TOLERANCE || (rot.determinant() - 1.0).abs() > POSE_TOLERANCE {
            return Err(FusionError::InvalidCamera(
                "pose rotation is not orthonormal with determinant one".to_string(),
            ));
        }
        self.pose = pose;
        self.inv_pose = rigid_inverse(&pose);
        Ok(())
    }

    /// Move the camera centre to `p`, keeping the orientation.
    pub fn move_to(&mut self, p: Vec3) {
        self.pose.w_axis = p.extend(1.0);
        self.inv_pose = rigid_inverse(&self.pose);
    }

    /// Re-orient the camera so its +Z axis points from the current centre
    /// towards `target`, with world +Y as the up reference.
    ///
    /// The basis is rebuilt from cross products and re-normalised, so the
    /// rotation stays orthonormal regardless of accumulated float error.
    /// When the view direction is (nearly) vertical, world +Z is used as
    /// the reference instead. A target coincident with the camera centre
    /// leaves the orientation unchanged.
    pub fn look_at(&mut self, target: Vec3) {
        let center = self.center();
        let forward = target - center;
        if forward.length_squared() < f32::EPSILON {
            return;
        }
        let z = forward.normalize();

        let up = if z.y.abs() < 0.999 { Vec3::Y } else { Vec3::Z };
        // Camera +Y points down, so the right axis is z x up rather than
        // the usual up x z.
        let x = z.cross(up).normalize();
        let y = z.cross(x).normalize();

        self.pose = Mat4::from_cols(x.extend(0.0), y.extend(0.0), z.extend(0.0), center.extend(1.0));
        self.inv_pose = rigid_inverse(&self.pose);
    }

    /// Back-project pixel (u, v) into a world-space ray through its centre.
    ///
    /// The ray origin is the camera centre and the direction is the unit
    /// vector through pixel sample (u + 0.5, v + 0.5) at depth one.
    pub fn pixel_to_ray(&self, u: u32, v: u32) -> Ray {
        let dir_cam = Vec3::new(
            (u as f32 + 0.5 - self.intrinsics.cx) / self.intrinsics.fx,
            (v as f32 + 0.5 - self.intrinsics.cy) / self.intrinsics.fy,
            1.0,
        )
        .normalize();
        let direction = Mat3::from_mat4(self.pose) * dir_cam;
        Ray {
            origin: self.center(),
            direction,
        }
    }

    /// Project a world point into the image.
    ///
    /// # Returns
    ///
    /// `(u, v, z_cam)` where `z_cam` is the camera-space depth. Points at or
    /// behind the camera plane yield `z_cam <= 0` and non-finite pixel
    /// coordinates; callers are expected to test the depth first.
    pub fn world_to_pixel(&self, p: Vec3) -> (f32, f32, f32) {
        let pc = self.inv_pose.transform_point3(p);
        let u = self.intrinsics.fx * pc.x / pc.z + self.intrinsics.cx;
        let v = self.intrinsics.fy * pc.y / pc.z + self.intrinsics.cy;
        (u, v, pc.z)
    }
}

/// Invert a rigid transform without a general matrix inverse.
fn rigid_inverse(pose: &Mat4) -> Mat4 {
    let rot_t = Mat3::from_mat4(*pose).transpose();
    let t = pose.w_axis.truncate();
    Mat4::from_mat3(rot_t) * Mat4::from_translation(-t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn kinect_intrinsics() -> CameraIntrinsics {
        CameraIntrinsics::new(525.0, 525.0, 319.5, 239.5, 640, 480).unwrap()
    }

    #[test]
    fn test_intrinsics_validation() {
        assert!(CameraIntrinsics::new(0.0, 525.0, 319.5, 239.5, 640, 480).is_err());
        assert!(CameraIntrinsics::new(525.0, -1.0, 319.5, 239.5, 640, 480).is_err());
        assert!(CameraIntrinsics::new(525.0, 525.0, 319.5, 239.5, 0, 480).is_err());
    }

    #[test]
    fn test_identity_projection() {
        let camera = Camera::new(kinect_intrinsics());
        let (u, v, z) = camera.world_to_pixel(Vec3::new(0.0, 0.0, 1000.0));
        assert_relative_eq!(u, 319.5, epsilon = 1e-4);
        assert_relative_eq!(v, 239.5, epsilon = 1e-4);
        assert_relative_eq!(z, 1000.0, epsilon = 1e-3);
    }

    #[test]
    fn test_projection_round_trip() {
        let mut camera = Camera::new(kinect_intrinsics());
        camera.move_to(Vec3::new(1200.0, 600.0, 1500.0));
        camera.look_at(Vec3::new(0.0, 0.0, 0.0));

        let p = Vec3::new(150.0, -80.0, 120.0);
        let (u, v, z) = camera.world_to_pixel(p);
        assert!(z > 0.0);

        let ray = camera.pixel_to_ray(u as u32, v as u32);
        // The pixel-centre ray passes within a pixel of the original point.
        let t = (p - ray.origin).dot(ray.direction);
        assert!(t > 0.0);
        let closest = ray.point_at(t);
        assert!((closest - p).length() < 1e-3 * p.length() + 5.0);
    }

    #[test]
    fn test_look_at_along_negative_z() {
        let mut camera = Camera::new(kinect_intrinsics());
        camera.move_to(Vec3::new(0.0, 0.0, 2000.0));
        camera.look_at(Vec3::ZERO);

        // Forward axis is -Z in world coordinates, and the basis stays a
        // proper rotation with camera +Y pointing down.
        let rot = Mat3::from_mat4(*camera.pose());
        assert_relative_eq!(rot.z_axis.z, -1.0, epsilon = 1e-6);
        assert_relative_eq!(rot.y_axis.y, -1.0, epsilon = 1e-6);
        assert_relative_eq!(rot.determinant(), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_look_at_degenerate_target() {
        let mut camera = Camera::new(kinect_intrinsics());
        camera.move_to(Vec3::new(10.0, 20.0, 30.0));
        let before = *camera.pose();
        camera.look_at(Vec3::new(10.0, 20.0, 30.0));
        assert_eq!(before, *camera.pose());
    }

    #[test]
    fn test_set_pose_rejects_sheared_matrix() {
        let mut camera = Camera::new(kinect_intrinsics());
        let mut bad = Mat4::IDENTITY;
        bad.x_axis.y = 0.5;
        assert!(camera.set_pose(bad).is_err());
    }

    #[test]
    fn test_inverse_pose_consistency() {
        let mut camera = Camera::new(kinect_intrinsics());
        camera.move_to(Vec3::new(1344.4, 627.2, 1661.8));
        camera.look_at(Vec3::new(0.0, 4000.0, 6000.0));

        let round_trip = *camera.pose() * *camera.inverse_pose();
        for c in 0..4 {
            for r in 0..4 {
                let expected = if r == c { 1.0 } else { 0.0 };
                assert_relative_eq!(round_trip.col(c)[r], expected, epsilon = 1e-4);
            }
        }
    }

    #[test]
    fn test_pixel_to_ray_is_unit_and_forward() {
        let mut camera = Camera::new(kinect_intrinsics());
        camera.move_to(Vec3::new(0.0, 0.0, -500.0));
        let ray = camera.pixel_to_ray(320, 240);
        assert_relative_eq!(ray.direction.length(), 1.0, epsilon = 1e-6);
        assert!(ray.direction.z > 0.99);
        assert_relative_eq!(ray.origin.z, -500.0);
    }
}
