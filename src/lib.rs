#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # TSDF Fusion
//!
//! Dense surface reconstruction of a rigid scene from registered depth
//! images, in the style of KinectFusion: depth frames are fused into a
//! truncated signed distance volume, which can then be raycast into
//! per-pixel vertex/normal maps or polygonised into a triangle mesh.
//!
//! All lengths are in millimetres, the camera frame is +X right, +Y down,
//! +Z forward, and the volume stores the normalised TSDF in [-1, 1].
//!
//! ## Example: fusing a synthetic frame
//!
//! ```rust
//! use glam::Vec3;
//! use tsdf_fusion::{
//!     integrate, Camera, CameraIntrinsics, DepthImage, ParallelRaycaster, Raycaster,
//!     TsdfVolume,
//! };
//!
//! // A flat wall 1.5 m in front of the camera.
//! let pixels = vec![1500u16; 80 * 60];
//! let depth = DepthImage::new(80, 60, &pixels)?;
//!
//! let intrinsics = CameraIntrinsics::new(65.0, 65.0, 39.5, 29.5, 80, 60)?;
//! let camera = Camera::new(intrinsics);
//!
//! let mut volume = TsdfVolume::new(
//!     [64, 64, 64],
//!     Vec3::splat(3000.0),
//!     Vec3::new(-1500.0, -1500.0, 0.0),
//!     90.0,
//!     64.0,
//! )?;
//! integrate(&mut volume, &depth, &camera)?;
//!
//! let images = ParallelRaycaster.raycast(&volume, &camera);
//! assert!(images.num_hits() > 0);
//! # Ok::<(), tsdf_fusion::FusionError>(())
//! ```

/// Pinhole camera model: intrinsics, rigid pose and per-pixel rays.
pub mod camera;

/// Borrowed 16-bit depth images in millimetres.
pub mod depth;

/// Error type shared by the whole crate.
pub mod error;

/// Fusion of registered depth frames into the volume.
pub mod integrate;

/// Serialisation: volume blobs and PLY meshes.
pub mod io;

/// Marching-cubes polygonisation of the zero level set.
pub mod marching_cubes;

/// Surface raycasting into vertex and normal maps.
pub mod raycast;

/// Visualisation buffers derived from raycast output.
pub mod render;

/// Marching-cubes lookup tables.
pub mod tables;

/// The TSDF voxel volume and its sampling operations.
pub mod volume;

pub use camera::{Camera, CameraIntrinsics, Ray};
pub use depth::DepthImage;
pub use error::FusionError;
pub use integrate::integrate;
pub use marching_cubes::{extract_triangles, Triangle};
pub use raycast::{ParallelRaycaster, RaycastImages, Raycaster, ScalarRaycaster};
pub use volume::{TsdfVolume, Voxel};
