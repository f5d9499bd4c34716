use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::Value;
use shelf_pdf_engine::fixtures;
use std::fs;
use std::path::{Path, PathBuf};

fn write_fixture(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, bytes).expect("fixture should be written");
    path
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout should contain valid json")
}

#[test]
fn info_emits_stable_json_contract() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let bytes = fixtures::pdf_with_pages(&[(612.0, 792.0), (300.0, 300.0)]);
    let pdf = write_fixture(temp.path(), "two.pdf", &bytes);

    let output = cargo_bin_cmd!("shelf").arg("info").arg(&pdf).output().unwrap();
    assert!(output.status.success());

    let value = stdout_json(&output);
    assert_eq!(value["page_count"], 2);
    assert_eq!(value["first_page_size_pt"]["width"], 612.0);
    assert_eq!(value["first_page_size_pt"]["height"], 792.0);
    assert_eq!(value["path"], pdf.display().to_string());
}

#[test]
fn info_fails_for_missing_file() {
    let temp = tempfile::tempdir().expect("temp dir should be created");

    cargo_bin_cmd!("shelf")
        .arg("info")
        .arg(temp.path().join("missing.pdf"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("file does not exist"));
}

#[test]
fn info_fails_for_invalid_pdf() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let pdf = write_fixture(temp.path(), "invalid.pdf", b"this is not a pdf");

    cargo_bin_cmd!("shelf")
        .arg("info")
        .arg(&pdf)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to open PDF"));
}

#[test]
fn info_fails_for_encrypted_marker_pdf() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let mut bytes = fixtures::single_page_pdf(100.0, 100.0);
    bytes.extend_from_slice(b"\n% /Encrypt\n");
    let pdf = write_fixture(temp.path(), "encrypted.pdf", &bytes);

    cargo_bin_cmd!("shelf")
        .arg("info")
        .arg(&pdf)
        .assert()
        .failure()
        .stderr(predicate::str::contains("encrypted PDFs are not supported"));
}

#[test]
fn version_prints_package_version() {
    cargo_bin_cmd!("shelf")
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn thumbs_writes_files_and_reports_failures() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let out_dir = temp.path().join("out");
    let tall = write_fixture(temp.path(), "tall.pdf", &fixtures::single_page_pdf(600.0, 800.0));
    let small = write_fixture(temp.path(), "small.pdf", &fixtures::single_page_pdf(200.0, 100.0));
    let missing = temp.path().join("missing.pdf");

    let output = cargo_bin_cmd!("shelf")
        .arg("thumbs")
        .arg(&tall)
        .arg(&small)
        .arg(&missing)
        .arg("--out-dir")
        .arg(&out_dir)
        .arg("--format")
        .arg("png")
        .output()
        .unwrap();
    assert!(output.status.success(), "per-item failures should not fail the run");

    let report = stdout_json(&output);
    assert_eq!(report["total"], 3);
    assert_eq!(report["rendered"], 2);
    assert_eq!(report["failed"], 1);

    let items = report["items"].as_array().unwrap();
    assert_eq!(items[0]["name"], "tall");
    assert_eq!(items[0]["status"], "rendered");
    assert_eq!(items[0]["width"], 300);
    assert_eq!(items[0]["height"], 400);
    assert_eq!(items[1]["width"], 200);
    assert_eq!(items[1]["height"], 100);
    assert_eq!(items[2]["status"], "failed");
    assert!(items[2]["error"].as_str().unwrap().contains("missing.pdf"));
    assert!(items[2].get("output").is_none());

    let thumb = image::open(out_dir.join("tall.png")).expect("thumbnail should be readable image");
    assert_eq!((thumb.width(), thumb.height()), (300, 400));
    assert!(out_dir.join("small.png").exists());
}

#[test]
fn thumbs_reads_manifest_relative_to_its_directory() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let books = temp.path().join("books");
    fs::create_dir_all(&books).unwrap();
    write_fixture(&books, "a.pdf", &fixtures::single_page_pdf(400.0, 400.0));
    let manifest = temp.path().join("catalog.json");
    fs::write(&manifest, r#"[{"name": "Cover A", "path": "books/a.pdf"}]"#).unwrap();
    let out_dir = temp.path().join("out");

    let output = cargo_bin_cmd!("shelf")
        .arg("thumbs")
        .arg("--manifest")
        .arg(&manifest)
        .arg("--out-dir")
        .arg(&out_dir)
        .arg("--width")
        .arg("100")
        .arg("--height")
        .arg("100")
        .output()
        .unwrap();
    assert!(output.status.success());

    let report = stdout_json(&output);
    assert_eq!(report["rendered"], 1);
    assert_eq!(report["items"][0]["name"], "Cover A");
    assert_eq!(report["items"][0]["width"], 100);

    let thumb = out_dir.join("Cover A.jpg");
    let image = image::open(&thumb).expect("default format should be jpeg");
    assert_eq!((image.width(), image.height()), (100, 100));
}

#[test]
fn thumbs_deduplicates_repeated_documents() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let pdf = write_fixture(temp.path(), "same.pdf", &fixtures::single_page_pdf(300.0, 400.0));
    let out_dir = temp.path().join("out");

    let output = cargo_bin_cmd!("shelf")
        .arg("thumbs")
        .arg(&pdf)
        .arg(&pdf)
        .arg("--out-dir")
        .arg(&out_dir)
        .arg("--format")
        .arg("png")
        .output()
        .unwrap();
    assert!(output.status.success());

    let report = stdout_json(&output);
    assert_eq!(report["rendered"], 2);
    assert!(out_dir.join("same.png").exists());
    assert!(out_dir.join("same-2.png").exists());
}

#[test]
fn thumbs_requires_documents() {
    let temp = tempfile::tempdir().expect("temp dir should be created");

    cargo_bin_cmd!("shelf")
        .arg("thumbs")
        .arg("--out-dir")
        .arg(temp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("no documents given"));
}

#[test]
fn thumbs_rejects_bad_env_override() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let pdf = write_fixture(temp.path(), "a.pdf", &fixtures::single_page_pdf(100.0, 100.0));

    cargo_bin_cmd!("shelf")
        .arg("thumbs")
        .arg(&pdf)
        .arg("--out-dir")
        .arg(temp.path().join("out"))
        .env("SHELF_MAX_CONCURRENT", "lots")
        .assert()
        .failure()
        .stderr(predicate::str::contains("SHELF_MAX_CONCURRENT"));
}
