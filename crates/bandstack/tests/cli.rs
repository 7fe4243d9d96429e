use assert_cmd::Command;
use bandstack::core::synthetic::SyntheticScene;
use bandstack::core::{BandImage, LensModel, WarpTransform};
use bandstack::load::save_band;
use predicates::prelude::*;
use serde_json::json;
use std::path::Path;

const SIZE: usize = 96;
const OFFSETS: [(f64, f64); 3] = [(2.0, 1.0), (0.0, 0.0), (-1.0, 2.0)];

fn write_capture(dir: &Path, flat_band: Option<usize>) -> std::path::PathBuf {
    let scene = SyntheticScene::new(SIZE, SIZE, 11);
    let lens = LensModel::pinhole(SIZE, SIZE, 90.0);
    let mut bands = Vec::new();
    for (i, &(dx, dy)) in OFFSETS.iter().enumerate() {
        let img = if flat_band == Some(i) {
            BandImage::filled(SIZE, SIZE, 0.5)
        } else {
            scene
                .render_band(SIZE, SIZE, &WarpTransform::translation(dx, dy), &lens, 0.3, 0.05)
                .unwrap()
        };
        let name = format!("band{i}.png");
        save_band(&img, dir.join(&name)).unwrap();
        bands.push(json!({
            "index": i,
            "path": name,
            "lens": lens,
        }));
    }
    let config = json!({
        "bands": bands,
        "alignment": {
            "reference_index": 1,
            "ecc": { "pyramid_levels": 1, "edge_filter": false }
        }
    });
    let path = dir.join("capture.json");
    std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
    path
}

#[test]
fn align_writes_report_and_bands() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_capture(dir.path(), None);
    let report = dir.path().join("report.json");
    let out = dir.path().join("aligned");

    Command::cargo_bin("bandstack")
        .unwrap()
        .arg("align")
        .arg(&config)
        .arg("--report")
        .arg(&report)
        .arg("--write-bands")
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("aligned 3 bands").and(predicate::str::contains("0 failed")));

    let raw = std::fs::read_to_string(&report).unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value["reference"], 1);
    let crop = &value["crop"];
    assert!(crop["width"].as_u64().unwrap() > 80);
    for b in 0..3 {
        assert!(out.join(format!("band_{b}.png")).exists());
    }

    Command::cargo_bin("bandstack")
        .unwrap()
        .arg("report")
        .arg(&report)
        .assert()
        .success()
        .stdout(predicate::str::contains("reference band: 1").and(predicate::str::contains("crop:")));
}

#[test]
fn strict_run_fails_on_flat_band_and_lenient_run_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_capture(dir.path(), Some(2));

    Command::cargo_bin("bandstack")
        .unwrap()
        .arg("align")
        .arg(&config)
        .arg("--report")
        .arg(dir.path().join("strict.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));

    Command::cargo_bin("bandstack")
        .unwrap()
        .arg("align")
        .arg(&config)
        .arg("--lenient")
        .arg("--report")
        .arg(dir.path().join("lenient.json"))
        .assert()
        .success()
        .stdout(predicate::str::contains("1 failed"));
}

#[test]
fn missing_config_is_an_error() {
    Command::cargo_bin("bandstack")
        .unwrap()
        .args(["align", "/no/such/capture.json"])
        .assert()
        .failure();
}
