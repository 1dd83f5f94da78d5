use glam::Vec3;

use crate::error::FusionError;

/// A single cell of the TSDF volume.
///
/// `distance` is the normalised truncated signed distance in [-1, 1]
/// (negative behind the surface, positive in front). A voxel with zero
/// weight has never been observed and its distance is meaningless; it is
/// initialised to 1.0, the free-space value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Voxel {
    /// Normalised truncated signed distance.
    pub distance: f32,
    /// Accumulated observation weight, saturating at the volume's maximum.
    pub weight: f32,
}

impl Default for Voxel {
    fn default() -> Self {
        Self {
            distance: 1.0,
            weight: 0.0,
        }
    }
}

impl Voxel {
    /// Whether this voxel has been observed at least once.
    #[inline]
    pub fn is_seen(&self) -> bool {
        self.weight > 0.0
    }
}

/// A dense truncated signed distance volume over a fixed voxel grid.
///
/// Voxels are stored in a single flat allocation in x-fastest order:
/// `index = i + nx * (j + ny * k)`. The `origin` is the world coordinate
/// of the *corner* of voxel (0, 0, 0); voxel (i, j, k) is centred at
/// `origin + (i + 0.5, j + 0.5, k + 0.5) * voxel_size`. All lengths are in
/// millimetres.
///
/// The volume is mutated exclusively by [`crate::integrate::integrate`];
/// the raycaster and the mesh extractor only read it, which the borrow
/// checker enforces at compile time.
#[derive(Debug, Clone, PartialEq)]
pub struct TsdfVolume {
    dims: [usize; 3],
    size: Vec3,
    voxel_size: Vec3,
    origin: Vec3,
    trunc: f32,
    max_weight: f32,
    voxels: Vec<Voxel>,
}

impl TsdfVolume {
    /// Create an empty volume (all voxels unseen).
    ///
    /// # Arguments
    ///
    /// * `dims` - Grid resolution [nx, ny, nz], each > 0.
    /// * `size` - Physical extent in millimetres, each component > 0.
    /// * `origin` - World coordinate of the corner of voxel (0, 0, 0).
    /// * `trunc` - Truncation distance in millimetres, > 0.
    /// * `max_weight` - Saturation value for voxel weights, > 0.
    pub fn new(
        dims: [usize; 3],
        size: Vec3,
        origin: Vec3,
        trunc: f32,
        max_weight: f32,
    ) -> Result<Self, FusionError> {
        if dims.contains(&0) {
            return Err(FusionError::InvalidInput(format!(
                "volume dimensions must be non-zero, got {dims:?}"
            )));
        }
        if !(size.min_element() > 0.0) || !size.is_finite() {
            return Err(FusionError::InvalidInput(format!(
                "volume size must be positive, got {size}"
            )));
        }
        if !origin.is_finite() {
            return Err(FusionError::InvalidInput(format!(
                "volume origin must be finite, got {origin}"
            )));
        }
        if !(trunc > 0.0) || !trunc.is_finite() {
            return Err(FusionError::InvalidInput(format!(
                "truncation distance must be positive, got {trunc}"
            )));
        }
        if !(max_weight > 0.0) || !max_weight.is_finite() {
            return Err(FusionError::InvalidInput(format!(
                "maximum weight must be positive, got {max_weight}"
            )));
        }
        let num_voxels = dims[0]
            .checked_mul(dims[1])
            .and_then(|n| n.checked_mul(dims[2]))
            .ok_or_else(|| {
                FusionError::InvalidInput(format!("volume dimensions {dims:?} overflow"))
            })?;

        let voxel_size = Vec3::new(
            size.x / dims[0] as f32,
            size.y / dims[1] as f32,
            size.z / dims[2] as f32,
        );

        Ok(Self {
            dims,
            size,
            voxel_size,
            origin,
            trunc,
            max_weight,
            voxels: vec![Voxel::default(); num_voxels],
        })
    }

    /// Grid resolution [nx, ny, nz].
    #[inline]
    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// Physical extent in millimetres.
    #[inline]
    pub fn size(&self) -> Vec3 {
        self.size
    }

    /// Per-axis voxel size in millimetres.
    #[inline]
    pub fn voxel_size(&self) -> Vec3 {
        self.voxel_size
    }

    /// World coordinate of the corner of voxel (0, 0, 0).
    #[inline]
    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    /// Truncation distance in millimetres.
    #[inline]
    pub fn trunc(&self) -> f32 {
        self.trunc
    }

    /// Weight saturation value.
    #[inline]
    pub fn max_weight(&self) -> f32 {
        self.max_weight
    }

    /// Total number of voxels.
    #[inline]
    pub fn num_voxels(&self) -> usize {
        self.voxels.len()
    }

    /// The flat voxel storage in x-fastest order.
    #[inline]
    pub fn voxels(&self) -> &[Voxel] {
        &self.voxels
    }

    /// Mutable access to the flat voxel storage.
    ///
    /// Mutators must preserve the invariants `weight ∈ [0, max_weight]` and
    /// `|distance| <= 1` whenever `weight > 0`.
    #[inline]
    pub fn voxels_mut(&mut self) -> &mut [Voxel] {
        &mut self.voxels
    }

    /// Flat index of voxel (i, j, k) in x-fastest order.
    #[inline]
    pub fn linear_index(&self, i: usize, j: usize, k: usize) -> usize {
        debug_assert!(i < self.dims[0] && j < self.dims[1] && k < self.dims[2]);
        i + self.dims[0] * (j + self.dims[1] * k)
    }

    /// Borrow voxel (i, j, k). Bounds are debug-checked.
    #[inline]
    pub fn at(&self, i: usize, j: usize, k: usize) -> &Voxel {
        &self.voxels[self.linear_index(i, j, k)]
    }

    /// Mutably borrow voxel (i, j, k). Bounds are debug-checked.
    #[inline]
    pub fn at_mut(&mut self, i: usize, j: usize, k: usize) -> &mut Voxel {
        let idx = self.linear_index(i, j, k);
        &mut self.voxels[idx]
    }

    /// World coordinate of the centre of voxel (i, j, k).
    #[inline]
    pub fn voxel_center(&self, i: usize, j: usize, k: usize) -> Vec3 {
        self.origin
            + Vec3::new(i as f32 + 0.5, j as f32 + 0.5, k as f32 + 0.5) * self.voxel_size
    }

    /// Axis-aligned bounds of the volume as (min, max) corners.
    #[inline]
    pub fn aabb(&self) -> (Vec3, Vec3) {
        (self.origin, self.origin + self.size)
    }

    /// Whether the world point lies inside the volume bounds.
    #[inline]
    pub fn contains(&self, p: Vec3) -> bool {
        let (lo, hi) = self.aabb();
        p.cmpge(lo).all() && p.cmplt(hi).all()
    }

    /// Forget all observations, returning the volume to its initial state.
    pub fn reset(&mut self) {
        self.voxels.fill(Voxel::default());
    }

    /// Trilinearly interpolated TSDF at a world point.
    ///
    /// Sampling happens on the lattice of voxel centres; `None` is returned
    /// when the point falls outside that lattice or any of the eight
    /// surrounding voxels is unseen.
    pub fn trilinear_distance(&self, p: Vec3) -> Option<f32> {
        let [nx, ny, nz] = self.dims;
        if nx < 2 || ny < 2 || nz < 2 {
            return None;
        }
        // Continuous lattice coordinate: voxel centre (i, j, k) sits at
        // lattice position (i, j, k).
        let g = (p - self.origin) / self.voxel_size - 0.5;
        if g.x < 0.0 || g.y < 0.0 || g.z < 0.0 {
            return None;
        }
        if g.x > (nx - 1) as f32 || g.y > (ny - 1) as f32 || g.z > (nz - 1) as f32 {
            return None;
        }
        let i = (g.x as usize).min(nx - 2);
        let j = (g.y as usize).min(ny - 2);
        let k = (g.z as usize).min(nz - 2);
        let fx = g.x - i as f32;
        let fy = g.y - j as f32;
        let fz = g.z - k as f32;

        let mut d = [[0.0f32; 2]; 4];
        for dk in 0..2 {
            for dj in 0..2 {
                for di in 0..2 {
                    let v = self.at(i + di, j + dj, k + dk);
                    if !v.is_seen() {
                        return None;
                    }
                    d[dj + 2 * dk][di] = v.distance;
                }
            }
        }

        let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
        let d00 = lerp(d[0][0], d[0][1], fx);
        let d10 = lerp(d[1][0], d[1][1], fx);
        let d01 = lerp(d[2][0], d[2][1], fx);
        let d11 = lerp(d[3][0], d[3][1], fx);
        let d0 = lerp(d00, d10, fy);
        let d1 = lerp(d01, d11, fy);
        Some(lerp(d0, d1, fz))
    }

    /// Unnormalised gradient of the interpolated TSDF at a world point.
    ///
    /// Central differences along each world axis with the voxel size as the
    /// step; by construction the gradient points from negative distances
    /// (inside) towards positive ones (outside). `None` when any of the six
    /// samples is undefined. Callers normalise the result to obtain a
    /// surface normal.
    pub fn distance_gradient(&self, p: Vec3) -> Option<Vec3> {
        let step = self.voxel_size;
        let dx = self.trilinear_distance(p + Vec3::new(step.x, 0.0, 0.0))?
            - self.trilinear_distance(p - Vec3::new(step.x, 0.0, 0.0))?;
        let dy = self.trilinear_distance(p + Vec3::new(0.0, step.y, 0.0))?
            - self.trilinear_distance(p - Vec3::new(0.0, step.y, 0.0))?;
        let dz = self.trilinear_distance(p + Vec3::new(0.0, 0.0, step.z))?
            - self.trilinear_distance(p - Vec3::new(0.0, 0.0, step.z))?;
        Some(Vec3::new(
            dx / (2.0 * step.x),
            dy / (2.0 * step.y),
            dz / (2.0 * step.z),
        ))
    }
}
