use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::Vec3;

use crate::error::FusionError;
use crate::volume::TsdfVolume;

const MAGIC: &[u8; 4] = b"TSDF";
const VERSION: u8 = 1;

/// Serialise a volume into its deterministic binary form.
///
/// Layout, all little-endian: the magic bytes `"TSDF"`, a one-byte
/// version, three u32 dims, three f32 physical sizes (mm), three f32
/// origin coordinates (mm), f32 truncation distance (mm), f32 maximum
/// weight, then one (f32 distance, f32 weight) record per voxel in
/// x-fastest order.
pub fn write_volume<W: Write>(writer: &mut W, volume: &TsdfVolume) -> Result<(), FusionError> {
    writer.write_all(MAGIC)?;
    writer.write_u8(VERSION)?;
    for d in volume.dims() {
        let d = u32::try_from(d).map_err(|_| {
            FusionError::Format(format!("dimension {d} does not fit the 32-bit header"))
        })?;
        writer.write_u32::<LittleEndian>(d)?;
    }
    for s in volume.size().to_array() {
        writer.write_f32::<LittleEndian>(s)?;
    }
    for o in volume.origin().to_array() {
        writer.write_f32::<LittleEndian>(o)?;
    }
    writer.write_f32::<LittleEndian>(volume.trunc())?;
    writer.write_f32::<LittleEndian>(volume.max_weight())?;
    for voxel in volume.voxels() {
        writer.write_f32::<LittleEndian>(voxel.distance)?;
        writer.write_f32::<LittleEndian>(voxel.weight)?;
    }
    Ok(())
}

/// Deserialise a volume written by [`write_volume`].
///
/// # Errors
///
/// `Format` on a magic or version mismatch and on header fields that do
/// not describe a valid volume; `Io` on truncation or any underlying read
/// failure.
pub fn read_volume<R: Read>(reader: &mut R) -> Result<TsdfVolume, FusionError> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(FusionError::Format(format!(
            "bad magic {magic:?}, expected {MAGIC:?}"
        )));
    }
    let version = reader.read_u8()?;
    if version != VERSION {
        return Err(FusionError::Format(format!(
            "unsupported version {version}, expected {VERSION}"
        )));
    }

    let mut dims = [0usize; 3];
    for d in &mut dims {
        *d = reader.read_u32::<LittleEndian>()? as usize;
    }
    let mut size = [0.0f32; 3];
    for s in &mut size {
        *s = reader.read_f32::<LittleEndian>()?;
    }
    let mut origin = [0.0f32; 3];
    for o in &mut origin {
        *o = reader.read_f32::<LittleEndian>()?;
    }
    let trunc = reader.read_f32::<LittleEndian>()?;
    let max_weight = reader.read_f32::<LittleEndian>()?;

    let mut volume = TsdfVolume::new(
        dims,
        Vec3::from_array(size),
        Vec3::from_array(origin),
        trunc,
        max_weight,
    )
    .map_err(|e| FusionError::Format(format!("invalid header: {e}")))?;

    for voxel in volume.voxels_mut() {
        voxel.distance = reader.read_f32::<LittleEndian>()?;
        voxel.weight = reader.read_f32::<LittleEndian>()?;
    }
    Ok(volume)
}

/// Write a volume blob to a file.
pub fn save_volume(path: impl AsRef<Path>, volume: &TsdfVolume) -> Result<(), FusionError> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_volume(&mut writer, volume)?;
    writer.flush()?;
    Ok(())
}

/// Read a volume blob from a file.
pub fn load_volume(path: impl AsRef<Path>) -> Result<TsdfVolume, FusionError> {
    read_volume(&mut BufReader::new(File::open(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::Voxel;

    fn sample_volume() -> TsdfVolume {
        let mut volume = TsdfVolume::new(
            [3, 4, 5],
            Vec3::new(300.0, 400.0, 500.0),
            Vec3::new(-150.0, -200.0, 1000.0),
            75.0,
            32.0,
        )
        .unwrap();
        for (idx, voxel) in volume.voxels_mut().iter_mut().enumerate() {
            if idx % 3 == 0 {
                *voxel = Voxel {
                    distance: (idx as f32 * 0.013).sin(),
                    weight: 1.0 + (idx % 7) as f32,
                };
            }
        }
        volume
    }

    #[test]
    fn test_round_trip_is_bit_exact() {
        let volume = sample_volume();
        let mut blob = Vec::new();
        write_volume(&mut blob, &volume).unwrap();
        let restored = read_volume(&mut blob.as_slice()).unwrap();
        assert_eq!(volume, restored);
    }

    #[test]
    fn test_header_layout() {
        let volume = sample_volume();
        let mut blob = Vec::new();
        write_volume(&mut blob, &volume).unwrap();

        assert_eq!(&blob[0..4], b"TSDF");
        assert_eq!(blob[4], 1);
        assert_eq!(&blob[5..9], &3u32.to_le_bytes());
        assert_eq!(&blob[9..13], &4u32.to_le_bytes());
        assert_eq!(&blob[13..17], &5u32.to_le_bytes());
        assert_eq!(&blob[17..21], &300.0f32.to_le_bytes());
        // 3 dims + 3 sizes + 3 origin + trunc + max_weight after the
        // 5-byte preamble, then the voxel records.
        let header_len = 5 + 12 + 12 + 12 + 4 + 4;
        assert_eq!(blob.len(), header_len + 3 * 4 * 5 * 8);
    }

    #[test]
    fn test_bad_magic_is_rejected() {
        let volume = sample_volume();
        let mut blob = Vec::new();
        write_volume(&mut blob, &volume).unwrap();
        blob[0] = b'X';
        assert!(matches!(
            read_volume(&mut blob.as_slice()),
            Err(FusionError::Format(_))
        ));
    }

    #[test]
    fn test_unsupported_version_is_rejected() {
        let volume = sample_volume();
        let mut blob = Vec::new();
        write_volume(&mut blob, &volume).unwrap();
        blob[4] = 9;
        assert!(matches!(
            read_volume(&mut blob.as_slice()),
            Err(FusionError::Format(_))
        ));
    }

    #[test]
    fn test_truncated_blob_is_an_io_error() {
        let volume = sample_volume();
        let mut blob = Vec::new();
        write_volume(&mut blob, &volume).unwrap();
        blob.truncate(blob.len() - 5);
        assert!(matches!(
            read_volume(&mut blob.as_slice()),
            Err(FusionError::Io(_))
        ));
    }

    #[test]
    fn test_file_round_trip() {
        let volume = sample_volume();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("volume.tsdf");
        save_volume(&path, &volume).unwrap();
        let restored = load_volume(&path).unwrap();
        assert_eq!(volume, restored);
    }
}
