use std::fs;
use std::path::Path;

use image::{GrayImage, Luma};
use monovo_cli::output::tum::read_tum;
use monovo_cli::{
    CliError, Dataset, DatasetFormat, FrameRange, OutputPaths, ProcessingConfig,
    SequenceProcessor,
};
use monovo_core::CameraIntrinsics;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use tempfile::TempDir;

const WIDTH: u32 = 240;
const HEIGHT: u32 = 180;

fn scene(seed: u64) -> GrayImage {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut image = GrayImage::from_pixel(WIDTH + 64, HEIGHT, Luma([30]));
    for _ in 0..90 {
        let w = rng.gen_range(5..24);
        let h = rng.gen_range(5..24);
        let x0 = rng.gen_range(0..WIDTH + 64 - w);
        let y0 = rng.gen_range(0..HEIGHT - h);
        let value = rng.gen_range(90..=255u8);
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                image.put_pixel(x, y, Luma([value]));
            }
        }
    }
    image
}

/// Writes `count` crops of one scene, sliding two pixels per frame.
fn write_frames(dir: &Path, count: u32, name: impl Fn(u32) -> String) {
    fs::create_dir_all(dir).unwrap();
    let world = scene(5);
    for i in 0..count {
        let crop = image::imageops::crop_imm(&world, 2 * i, 0, WIDTH, HEIGHT).to_image();
        crop.save(dir.join(name(i))).unwrap();
    }
}

fn intrinsics() -> CameraIntrinsics {
    CameraIntrinsics::pinhole(200.0, 200.0, 120.0, 90.0, WIDTH, HEIGHT)
}

fn outputs(dir: &Path) -> OutputPaths {
    OutputPaths {
        json: dir.join("results.json"),
        ply: Some(dir.join("cloud.ply")),
        tum: Some(dir.join("trajectory.txt")),
    }
}

#[test]
fn image_folder_run_writes_every_output() {
    let tmp = TempDir::new().unwrap();
    let frames = tmp.path().join("frames");
    write_frames(&frames, 6, |i| format!("{i:04}.png"));

    let config = ProcessingConfig {
        format: DatasetFormat::Images,
        fps: 10.0,
        checkpoint_every: Some(2),
        intrinsics: Some(intrinsics()),
        ..ProcessingConfig::default()
    };
    let paths = outputs(tmp.path());
    let dataset = Dataset::open(&frames, DatasetFormat::Images, config.fps).unwrap();
    let output = SequenceProcessor::new(config)
        .process_dataset(&dataset, &paths)
        .unwrap();

    assert_eq!(output.processed_frames, 6);
    assert_eq!(output.total_frames, 6);
    assert_eq!(output.trajectory.len(), 6);
    assert_eq!(output.frame_stats.len(), 6);
    assert!(
        output
            .trajectory
            .windows(2)
            .all(|w| w[0].frame_index < w[1].frame_index && w[0].timestamp <= w[1].timestamp)
    );

    let document: Value = serde_json::from_str(&fs::read_to_string(&paths.json).unwrap()).unwrap();
    assert_eq!(document["processed_frames"], 6);
    assert_eq!(document["trajectory"].as_array().unwrap().len(), 6);
    assert_eq!(document["metadata"]["intrinsics_source"], "command_line");
    let generated_at = document["metadata"]["generated_at"].as_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(generated_at).is_ok());
    assert!(document["point_cloud"].is_array());

    for frame in [1, 3, 5] {
        let checkpoint = tmp.path().join(format!("results.frame_{frame}.json"));
        assert!(checkpoint.is_file(), "missing {}", checkpoint.display());
    }

    let ply = fs::read_to_string(paths.ply.as_ref().unwrap()).unwrap();
    assert!(ply.starts_with("ply\nformat ascii 1.0\n"));
    assert!(ply.contains(&format!("element vertex {}\n", output.point_cloud.len())));

    let trajectory = read_tum(paths.tum.as_ref().unwrap()).unwrap();
    assert_eq!(trajectory.len(), 6);
    assert!((trajectory[5].timestamp - 0.5).abs() < 1e-9);
}

#[test]
fn euroc_run_uses_sensor_calibration_and_range() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("V1_01_easy");
    let cam0 = root.join("mav0").join("cam0");
    let stamps: Vec<u64> = (0..8).map(|i| 1_403_715_273_262_142_976 + i * 50_000_000).collect();
    write_frames(&cam0.join("data"), 8, |i| format!("{}.png", stamps[i as usize]));

    let mut csv = String::from("#timestamp [ns],filename\n");
    for stamp in &stamps {
        csv.push_str(&format!("{stamp},{stamp}.png\n"));
    }
    fs::write(cam0.join("data.csv"), csv).unwrap();
    fs::write(
        cam0.join("sensor.yaml"),
        format!(
            "sensor_type: camera\nresolution: [{WIDTH}, {HEIGHT}]\ncamera_model: pinhole\nintrinsics: [200.0, 200.0, 120.0, 90.0]\ndistortion_model: radial-tangential\ndistortion_coefficients: [0.0, 0.0, 0.0, 0.0]\n"
        ),
    )
    .unwrap();

    let config = ProcessingConfig {
        format: DatasetFormat::Euroc,
        range: FrameRange::new(1, Some(7), 2).unwrap(),
        ..ProcessingConfig::default()
    };
    let paths = OutputPaths {
        json: tmp.path().join("euroc.json"),
        ply: None,
        tum: None,
    };
    let results = SequenceProcessor::new(config).process_all(&[root], &paths);
    assert_eq!(results.len(), 1);
    let output = results[0].1.as_ref().unwrap();

    assert_eq!(output.total_frames, 8);
    assert_eq!(output.processed_frames, 3);
    let indices: Vec<u64> = output.trajectory.iter().map(|r| r.frame_index).collect();
    assert_eq!(indices, vec![1, 3, 5]);
    assert_eq!(output.metadata.dataset_name, "V1_01_easy");
    assert_eq!(output.metadata.intrinsics.fx, 200.0);
    assert!(paths.json.is_file());
}

#[test]
fn several_datasets_get_suffixed_outputs() {
    let tmp = TempDir::new().unwrap();
    let first = tmp.path().join("alpha");
    let second = tmp.path().join("beta");
    write_frames(&first, 3, |i| format!("{i}.png"));
    write_frames(&second, 4, |i| format!("{i}.png"));

    let config = ProcessingConfig {
        format: DatasetFormat::Images,
        intrinsics: Some(intrinsics()),
        ..ProcessingConfig::default()
    };
    let results = SequenceProcessor::new(config)
        .process_all(&[first, second], &outputs(tmp.path()));

    assert!(results.iter().all(|(_, r)| r.is_ok()));
    for (name, frames) in [("alpha", 3), ("beta", 4)] {
        let json = tmp.path().join(format!("results_{name}.json"));
        let document: Value = serde_json::from_str(&fs::read_to_string(json).unwrap()).unwrap();
        assert_eq!(document["processed_frames"], frames);
        assert!(tmp.path().join(format!("cloud_{name}.ply")).is_file());
        assert!(tmp.path().join(format!("trajectory_{name}.txt")).is_file());
    }
}

#[test]
fn missing_intrinsics_fail_before_processing() {
    let tmp = TempDir::new().unwrap();
    let frames = tmp.path().join("frames");
    write_frames(&frames, 2, |i| format!("{i}.png"));

    let config = ProcessingConfig {
        format: DatasetFormat::Images,
        ..ProcessingConfig::default()
    };
    let results = SequenceProcessor::new(config).process_all(&[frames], &outputs(tmp.path()));

    assert!(matches!(results[0].1, Err(CliError::IntrinsicsMissing(_))));
    assert!(!tmp.path().join("results.json").exists());
}
