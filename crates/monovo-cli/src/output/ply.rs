//! ASCII PLY export of the landmark map.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use monovo_core::LandmarkPoint;

use crate::errors::Result;

pub fn write_ply(path: impl AsRef<Path>, points: &[LandmarkPoint]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_ply_to(&mut writer, points)?;
    writer.flush()?;
    Ok(())
}

pub fn write_ply_to<W: Write>(writer: &mut W, points: &[LandmarkPoint]) -> std::io::Result<()> {
    writeln!(writer, "ply")?;
    writeln!(writer, "format ascii 1.0")?;
    writeln!(writer, "element vertex {}", points.len())?;
    for axis in ["x", "y", "z"] {
        writeln!(writer, "property float {axis}")?;
    }
    for channel in ["red", "green", "blue"] {
        writeln!(writer, "property uchar {channel}")?;
    }
    writeln!(writer, "end_header")?;

    for point in points {
        let [x, y, z] = point.xyz;
        let c = point.intensity;
        writeln!(writer, "{x:.6} {y:.6} {z:.6} {c} {c} {c}")?;
    }
    Ok(())
}
