use thiserror::Error;

/// Errors produced by the fusion pipeline.
///
/// Data-dependent conditions (invalid depth pixels, missed rays, unseen
/// voxels) are never errors; they are handled inline by the kernels. Only
/// structural problems surface through this type.
#[derive(Debug, Error)]
pub enum FusionError {
    /// Inconsistent dimensions or non-positive volume parameters.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Malformed camera intrinsics or pose.
    #[error("invalid camera: {0}")]
    InvalidCamera(String),

    /// A volume blob with a bad magic, version or header.
    #[error("unsupported volume format: {0}")]
    Format(String),

    /// Underlying I/O failure, including unexpected end of file.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
