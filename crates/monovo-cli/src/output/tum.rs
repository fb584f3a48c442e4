//! TUM trajectory text format: `timestamp tx ty tz qx qy qz qw` per line.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use monovo_core::TrajectoryRecord;
use nalgebra::{Quaternion, UnitQuaternion, Vector3};

use crate::errors::{CliError, Result};

/// One timestamped pose read from a TUM trajectory file.
#[derive(Debug, Clone, PartialEq)]
pub struct TumPose {
    pub timestamp: f64,
    pub position: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
}

impl From<&TrajectoryRecord> for TumPose {
    fn from(record: &TrajectoryRecord) -> Self {
        Self {
            timestamp: record.timestamp,
            position: record.position(),
            orientation: UnitQuaternion::from_quaternion(Quaternion::new(
                record.qw, record.qx, record.qy, record.qz,
            )),
        }
    }
}

pub fn write_tum(path: impl AsRef<Path>, records: &[TrajectoryRecord]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_tum_to(&mut writer, records)?;
    writer.flush()?;
    Ok(())
}

pub fn write_tum_to<W: Write>(writer: &mut W, records: &[TrajectoryRecord]) -> std::io::Result<()> {
    writeln!(writer, "# timestamp tx ty tz qx qy qz qw")?;
    for r in records {
        writeln!(
            writer,
            "{:.9} {:.9} {:.9} {:.9} {:.9} {:.9} {:.9} {:.9}",
            r.timestamp, r.x, r.y, r.z, r.qx, r.qy, r.qz, r.qw
        )?;
    }
    Ok(())
}

pub fn read_tum(path: impl AsRef<Path>) -> Result<Vec<TumPose>> {
    let path = path.as_ref();
    read_tum_from(BufReader::new(File::open(path)?), &path.display().to_string())
}

/// Parses TUM lines. Blank lines and `#` comments are skipped; commas are
/// accepted as separators as well.
pub fn read_tum_from<R: BufRead>(reader: R, source: &str) -> Result<Vec<TumPose>> {
    let mut poses = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parse_error = |message: String| CliError::Parse {
            path: source.to_string(),
            line: number + 1,
            message,
        };

        let values = line
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|field| !field.is_empty())
            .map(str::parse::<f64>)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| parse_error(format!("invalid number: {e}")))?;
        let [timestamp, tx, ty, tz, qx, qy, qz, qw] = values[..] else {
            return Err(parse_error(format!("expected 8 values, found {}", values.len())));
        };

        let quaternion = Quaternion::new(qw, qx, qy, qz);
        if quaternion.norm() < f64::EPSILON {
            return Err(parse_error("zero-norm orientation".into()));
        }
        poses.push(TumPose {
            timestamp,
            position: Vector3::new(tx, ty, tz),
            orientation: UnitQuaternion::from_quaternion(quaternion),
        });
    }
    Ok(poses)
}
