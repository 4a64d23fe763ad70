use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

#[test]
fn new_document_exports_as_outline() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempdir()?;
    let doc_path = tmp.path().join("ideas.json");

    Command::cargo_bin("mindcanvas")?
        .arg("new")
        .arg("--output")
        .arg(&doc_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Generated mind map"));

    Command::cargo_bin("mindcanvas")?
        .arg("export")
        .arg("--input")
        .arg(&doc_path)
        .arg("--output")
        .arg("-")
        .arg("--output-format")
        .arg("outline")
        .assert()
        .success()
        .stdout(predicate::eq("- Main idea\n"));

    Ok(())
}

#[test]
fn exports_svg_next_to_input() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempdir()?;
    let doc_path = tmp.path().join("ideas.json");

    Command::cargo_bin("mindcanvas")?
        .arg("new")
        .arg("-o")
        .arg(&doc_path)
        .assert()
        .success();

    Command::cargo_bin("mindcanvas")?
        .arg("export")
        .arg("-i")
        .arg(&doc_path)
        .arg("-e")
        .arg("svg")
        .assert()
        .success();

    let svg_contents = fs::read_to_string(tmp.path().join("ideas.svg"))?;
    assert!(
        svg_contents.contains("<svg"),
        "output should contain an <svg> element"
    );
    assert!(svg_contents.contains("Main idea"));

    Ok(())
}

#[test]
fn malformed_input_is_reported() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempdir()?;
    let doc_path = tmp.path().join("broken.json");
    fs::write(&doc_path, "{ nodes: ")?;

    Command::cargo_bin("mindcanvas")?
        .arg("export")
        .arg("-i")
        .arg(&doc_path)
        .arg("-o")
        .arg("-")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to import mind map"));

    Ok(())
}

#[test]
fn import_replaces_stored_document() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempdir()?;
    let doc_path = tmp.path().join("ideas.json");
    let store_path = tmp.path().join("store.json");
    fs::write(&store_path, r#"{"nodes":[],"groups":[]}"#)?;
    fs::write(
        &doc_path,
        r##"{"nodes":[{"id":"a","text":"Imported","x":1,"y":2,"icon":"star","color":"#ef4444"}]}"##,
    )?;

    Command::cargo_bin("mindcanvas")?
        .arg("import")
        .arg("-i")
        .arg(&doc_path)
        .arg("--file")
        .arg(&store_path)
        .arg("--yes")
        .assert()
        .success()
        .stdout(predicate::str::contains("Imported 1 nodes and 0 groups"));

    let stored = fs::read_to_string(&store_path)?;
    assert!(stored.contains("\"Imported\""));
    assert!(stored.contains("\"groups\":[]"));

    Ok(())
}

#[test]
fn references_without_text_fail() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempdir()?;
    let doc_path = tmp.path().join("empty.json");
    fs::write(&doc_path, r#"{"nodes":[],"groups":[]}"#)?;

    Command::cargo_bin("mindcanvas")?
        .arg("references")
        .arg("-i")
        .arg(&doc_path)
        .arg("--api-key")
        .arg("unused")
        .assert()
        .failure()
        .stderr(predicate::str::contains("No text provided"));

    Ok(())
}
