// Allow deprecated APIs (assert_cmd::cargo_bin is deprecated but still works)
#![allow(deprecated)]

use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

fn project(config: &str) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let write = |rel: &str, text: &str| {
        let path = dir.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    };
    write("spa-pack.json", config);
    write(
        "src/main.js",
        "import './main.css';\nimport { greet } from './greet';\nconsole.log(greet('spa'));\n",
    );
    write("src/greet.js", "export function greet(name) {\n  return 'hello ' + name;\n}\n");
    write("src/main.css", "body {\n  margin: 0;\n}\n");
    dir
}

const CONFIG: &str = r#"{ "entries": { "app": "./src/main.js" }, "plugins": { "html": { "title": "CLI" } } }"#;

fn config_path(dir: &Path) -> PathBuf {
    dir.join("spa-pack.json")
}

#[test]
fn test_build_lists_written_files() -> Result<(), Box<dyn std::error::Error>> {
    let dir = project(CONFIG);
    Command::cargo_bin("spa-pack")?
        .arg("build")
        .arg("-c")
        .arg(config_path(dir.path()))
        .arg("-m")
        .arg("development")
        .env_remove("NODE_ENV")
        .assert()
        .success()
        .stdout(predicate::str::contains("build/app.bundle.js"))
        .stdout(predicate::str::contains("build/app.bundle.css"))
        .stdout(predicate::str::contains("build/index.html"));

    let script = fs::read_to_string(dir.path().join("build/app.bundle.js"))?;
    assert!(script.contains("'hello ' + name"));
    Ok(())
}

#[rstest]
#[case(None, None, "development")]
#[case(None, Some("production"), "production")]
#[case(Some("development"), Some("production"), "development")]
#[case(Some("production"), None, "production")]
fn test_mode_precedence(
    #[case] mode: Option<&str>,
    #[case] node_env: Option<&str>,
    #[case] expected: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let dir = project(CONFIG);
    let mut cmd = Command::cargo_bin("spa-pack")?;
    cmd.arg("build").arg("-c").arg(config_path(dir.path())).arg("--json");
    if let Some(mode) = mode {
        cmd.arg("--mode").arg(mode);
    }
    match node_env {
        Some(value) => cmd.env("NODE_ENV", value),
        None => cmd.env_remove("NODE_ENV"),
    };

    let output = cmd.assert().success().get_output().stdout.clone();
    let report: serde_json::Value = serde_json::from_slice(&output)?;
    assert_eq!(report["environment"], expected);
    assert_eq!(report["chunks"][0]["name"], "app");
    Ok(())
}

#[test]
fn test_missing_config_fails() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    Command::cargo_bin("spa-pack")?
        .arg("build")
        .arg("-c")
        .arg(dir.path().join("nope.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load config"));
    Ok(())
}

#[test]
fn test_invalid_mode_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
    Command::cargo_bin("spa-pack")?
        .args(["build", "--mode", "staging"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unsupported build environment: staging"));
    Ok(())
}

#[test]
fn test_build_error_is_reported() -> Result<(), Box<dyn std::error::Error>> {
    let dir = project(CONFIG);
    fs::write(dir.path().join("src/main.js"), "import './missing';\n")?;
    Command::cargo_bin("spa-pack")?
        .arg("build")
        .arg("-c")
        .arg(config_path(dir.path()))
        .env_remove("NODE_ENV")
        .assert()
        .failure()
        .stderr(predicate::str::contains("build failed"))
        .stderr(predicate::str::contains("./missing"));
    Ok(())
}
