use std::fs;
use std::path::Path;

use ereservify::formats::AcquisitionRecord;
use predicates::prelude::*;

fn write_png(path: &Path, width: u32, height: u32) {
    image::RgbImage::new(width, height)
        .save(path)
        .expect("write test image");
}

fn record(sequence: u32, chapter: (&str, &str, usize), image_path: &Path) -> AcquisitionRecord {
    AcquisitionRecord {
        sequence,
        chapter_id: chapter.0.to_owned(),
        chapter_name: chapter.1.to_owned(),
        chapter_ordinal: chapter.2,
        image_path: image_path.to_string_lossy().to_string(),
        width_px: 100,
        height_px: 140,
        retrieved_at: "2026-01-01T00:00:00+00:00".to_owned(),
    }
}

fn write_log(path: &Path, records: &[AcquisitionRecord]) {
    let mut lines = String::new();
    for record in records {
        lines.push_str(&serde_json::to_string(record).expect("serialize record"));
        lines.push('\n');
    }
    fs::write(path, lines).expect("write acquisition log");
}

#[test]
fn assemble_replays_an_acquisition_log_into_a_pdf() {
    let temp = tempfile::TempDir::new().expect("tempdir");
    let p1 = temp.path().join("p1.png");
    let p2 = temp.path().join("p2.png");
    let p3 = temp.path().join("p3.png");
    write_png(&p1, 100, 140);
    write_png(&p2, 100, 140);
    write_png(&p3, 100, 140);

    let manifest = temp.path().join("manifest.jsonl");
    write_log(
        &manifest,
        &[
            record(1, ("A", "Ch1", 0), &p1),
            record(2, ("A", "Ch1", 0), &p2),
            record(3, ("C", "Ch3", 2), &p3),
        ],
    );

    let out = temp.path().join("book.pdf");
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("ereservify");
    cmd.args([
        "assemble",
        "--manifest",
        manifest.to_str().unwrap(),
        "--out",
        out.to_str().unwrap(),
        "--title",
        "Test Book",
    ])
    .assert()
    .success();

    let bytes = fs::read(&out).expect("read pdf");
    assert!(bytes.starts_with(b"%PDF"));

    // outputs are never overwritten
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("ereservify");
    cmd.args([
        "assemble",
        "--manifest",
        manifest.to_str().unwrap(),
        "--out",
        out.to_str().unwrap(),
    ])
    .assert()
    .failure()
    .stderr(predicate::str::contains("already exists"));
}

#[test]
fn assemble_rejects_a_gapped_log() {
    let temp = tempfile::TempDir::new().expect("tempdir");
    let p1 = temp.path().join("p1.png");
    write_png(&p1, 100, 140);

    let manifest = temp.path().join("manifest.jsonl");
    write_log(
        &manifest,
        &[record(1, ("A", "Ch1", 0), &p1), record(3, ("A", "Ch1", 0), &p1)],
    );

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("ereservify");
    cmd.args([
        "assemble",
        "--manifest",
        manifest.to_str().unwrap(),
        "--out",
        temp.path().join("book.pdf").to_str().unwrap(),
    ])
    .assert()
    .failure()
    .stderr(predicate::str::contains("not contiguous"));
}

#[test]
fn assemble_fails_without_an_acquisition_log() {
    let temp = tempfile::TempDir::new().expect("tempdir");

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("ereservify");
    cmd.args([
        "assemble",
        "--manifest",
        temp.path().join("absent.jsonl").to_str().unwrap(),
        "--out",
        temp.path().join("book.pdf").to_str().unwrap(),
    ])
    .assert()
    .failure()
    .stderr(predicate::str::contains("open acquisition log"));
}
