use std::path::{Path, PathBuf};

use super::{Dataset, DatasetFormat, ImageEntry, Media};
use crate::errors::{CliError, Result};

const EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Plays back a directory of images in file-name order at a fixed rate.
pub struct ImageFolderProvider;

impl ImageFolderProvider {
    pub fn load(root: &Path, fps: f64) -> Result<Dataset> {
        if !(fps.is_finite() && fps > 0.0) {
            return Err(CliError::InvalidConfig(format!(
                "image folder playback needs a positive fps, got {fps}"
            )));
        }
        if !root.is_dir() {
            return Err(CliError::layout(root, "not a directory"));
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(root)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && Self::is_image(path))
            .collect();
        paths.sort();

        let entries = paths
            .into_iter()
            .enumerate()
            .map(|(index, path)| ImageEntry {
                timestamp: index as f64 / fps,
                path,
            })
            .collect();

        Ok(Dataset {
            name: Dataset::name_of(root),
            root: root.to_path_buf(),
            format: DatasetFormat::Images,
            media: Media::Images(entries),
            calibration: None,
        })
    }

    fn is_image(path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn lists_images_sorted_with_fps_timestamps() {
        let dir = TempDir::new().unwrap();
        for name in ["b.png", "a.JPG", "c.jpeg", "notes.txt"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }

        let dataset = ImageFolderProvider::load(dir.path(), 20.0).unwrap();
        let names: Vec<_> = dataset
            .entries()
            .iter()
            .map(|e| e.path.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.JPG", "b.png", "c.jpeg"]);
        assert_eq!(dataset.entries()[2].timestamp, 0.1);
    }

    #[test]
    fn rejects_non_positive_fps() {
        let dir = TempDir::new().unwrap();
        assert!(ImageFolderProvider::load(dir.path(), 0.0).is_err());
    }
}
