use std::path::Path;

use log::info;

use super::{Dataset, DatasetFormat, EurocProvider, ImageEntry, Media};
use crate::errors::{CliError, Result};

/// Loader for TUM sequences.
///
/// RGB-D sequences list their images in `rgb.txt`; TUM-VI sequences use the
/// ASL layout and are read through [`EurocProvider`].
pub struct TumProvider;

impl TumProvider {
    pub fn load(root: &Path) -> Result<Dataset> {
        let listing = root.join("rgb.txt");
        if !listing.is_file() {
            if root.join("mav0").is_dir() || root.join("cam0").is_dir() {
                info!("{} has no rgb.txt; reading it as a TUM-VI sequence", root.display());
                let mut dataset = EurocProvider::load(root)?;
                dataset.format = DatasetFormat::Tum;
                return Ok(dataset);
            }
            return Err(CliError::layout(root, "rgb.txt not found"));
        }

        let contents = std::fs::read_to_string(&listing)?;
        let entries = Self::parse_listing(&contents, root, &listing)?;
        Ok(Dataset {
            name: Dataset::name_of(root),
            root: root.to_path_buf(),
            format: DatasetFormat::Tum,
            media: Media::Images(entries),
            calibration: None,
        })
    }

    /// Parses `timestamp filename` lines; `#` starts a comment line.
    pub fn parse_listing(contents: &str, root: &Path, source: &Path) -> Result<Vec<ImageEntry>> {
        let mut entries = Vec::new();
        for (number, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let parse_error = |message: String| CliError::Parse {
                path: source.display().to_string(),
                line: number + 1,
                message,
            };

            let mut fields = line.split_whitespace();
            let (Some(stamp), Some(file)) = (fields.next(), fields.next()) else {
                return Err(parse_error("expected 'timestamp filename'".into()));
            };
            let timestamp: f64 = stamp
                .parse()
                .map_err(|e| parse_error(format!("invalid timestamp '{stamp}': {e}")))?;
            if !timestamp.is_finite() {
                return Err(parse_error(format!("timestamp '{stamp}' is not finite")));
            }
            entries.push(ImageEntry {
                timestamp,
                path: root.join(file),
            });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn parses_rgb_listing_with_comments() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("rgb.txt"),
            "# color images\n# file: 'rgbd_dataset_freiburg1_xyz.bag'\n# timestamp filename\n1305031102.175304 rgb/1305031102.175304.png\n\n1305031102.211214 rgb/1305031102.211214.png\n",
        )
        .unwrap();

        let dataset = TumProvider::load(dir.path()).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.format, DatasetFormat::Tum);
        assert!(dataset.calibration.is_none());
        assert_eq!(dataset.entries()[0].timestamp, 1305031102.175304);
        assert!(dataset.entries()[1].path.ends_with("rgb/1305031102.211214.png"));
    }

    #[test]
    fn malformed_line_reports_its_number() {
        let error = TumProvider::parse_listing(
            "# header\n1.0 a.png\nnot-a-number b.png\n",
            Path::new("/seq"),
            Path::new("/seq/rgb.txt"),
        )
        .unwrap_err();
        assert!(matches!(error, CliError::Parse { line: 3, .. }));
    }

    #[test]
    fn non_finite_timestamps_are_rejected() {
        for listing in ["0.0 a.png\nnan b.png\n", "0.0 a.png\ninf b.png\n"] {
            let error =
                TumProvider::parse_listing(listing, Path::new("/seq"), Path::new("/seq/rgb.txt"))
                    .unwrap_err();
            assert!(matches!(error, CliError::Parse { line: 2, .. }));
        }
    }

    #[test]
    fn missing_listing_is_a_layout_error() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            TumProvider::load(dir.path()),
            Err(CliError::DatasetLayout { .. })
        ));
    }
}
