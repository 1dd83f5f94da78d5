use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::error::FusionError;
use crate::marching_cubes::Triangle;

fn write_header<W: Write>(
    writer: &mut W,
    format: &str,
    triangles: &[Triangle],
) -> Result<(), FusionError> {
    writeln!(writer, "ply")?;
    writeln!(writer, "format {format} 1.0")?;
    writeln!(writer, "element vertex {}", triangles.len() * 3)?;
    writeln!(writer, "property float x")?;
    writeln!(writer, "property float y")?;
    writeln!(writer, "property float z")?;
    writeln!(writer, "property float nx")?;
    writeln!(writer, "property float ny")?;
    writeln!(writer, "property float nz")?;
    writeln!(writer, "element face {}", triangles.len())?;
    writeln!(writer, "property list uchar uint vertex_indices")?;
    writeln!(writer, "end_header")?;
    Ok(())
}

/// Write a triangle soup as an ASCII PLY file.
///
/// Each triangle contributes three vertices with positions and normals;
/// faces index the vertex list in emission order.
pub fn write_ply_ascii(
    path: impl AsRef<Path>,
    triangles: &[Triangle],
) -> Result<(), FusionError> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_header(&mut writer, "ascii", triangles)?;

    for t in triangles {
        for (v, n) in t.vertices.iter().zip(&t.normals) {
            writeln!(writer, "{} {} {} {} {} {}", v.x, v.y, v.z, n.x, n.y, n.z)?;
        }
    }
    for (i, _) in triangles.iter().enumerate() {
        let base = (i * 3) as u32;
        writeln!(writer, "3 {} {} {}", base, base + 1, base + 2)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write a triangle soup as a binary little-endian PLY file.
pub fn write_ply_binary(
    path: impl AsRef<Path>,
    triangles: &[Triangle],
) -> Result<(), FusionError> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_header(&mut writer, "binary_little_endian", triangles)?;

    for t in triangles {
        for (v, n) in t.vertices.iter().zip(&t.normals) {
            for value in [v.x, v.y, v.z, n.x, n.y, n.z] {
                writer.write_f32::<LittleEndian>(value)?;
            }
        }
    }
    for (i, _) in triangles.iter().enumerate() {
        let base = (i * 3) as u32;
        writer.write_u8(3)?;
        writer.write_u32::<LittleEndian>(base)?;
        writer.write_u32::<LittleEndian>(base + 1)?;
        writer.write_u32::<LittleEndian>(base + 2)?;
    }
    writer.flush()?;
    Ok(())
}
