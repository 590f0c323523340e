use assert_cmd::Command;
use hotreload_core::cache::{BytecodeCache, MANIFEST_FILE_NAME};
use hotreload_core::config::ReloaderConfig;
use hotreload_core::fs::{RealFileSystem, SourceLocator};
use hotreload_core::registry::SourceRegistry;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

fn hotreload_cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("hotreload"))
}

const CONFIG: &str = "sourceRoots: [src]\ncacheDir: .cache\nrunMode: dev\n";

/// Project directory with a config file and the given `(unit, source)` pairs
fn project(units: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("hotreload.yaml"), CONFIG).unwrap();
    for (name, source) in units {
        write_unit(dir.path(), name, source);
    }
    dir
}

fn unit_path(dir: &Path, name: &str) -> PathBuf {
    let relative = name.replace('.', "/");
    dir.join("src").join(format!("{}.src", relative))
}

fn write_unit(dir: &Path, name: &str, source: &str) {
    let path = unit_path(dir, name);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, source).unwrap();
}

/// Open the project's cache the same way the binary does
fn open_cache(dir: &Path) -> BytecodeCache {
    let config = ReloaderConfig::from_file(&dir.join("hotreload.yaml")).unwrap();
    let locator = SourceLocator::new(
        Arc::new(RealFileSystem::new()),
        config.source_roots.clone(),
        config.source_extension.clone(),
    );
    let registry = Arc::new(SourceRegistry::new(Arc::new(locator)));
    BytecodeCache::open(
        &config.cache_dir,
        &config.run_mode,
        &config.runtime_version,
        registry,
    )
}

fn seed_entry(dir: &Path, name: &str) {
    let source = fs::read_to_string(unit_path(dir, name)).unwrap();
    let cache = open_cache(dir);
    cache
        .store(name, format!("BC:{}", name).as_bytes(), &source)
        .unwrap();
}

// ============================================================================
// INIT
// ============================================================================

#[test]
fn test_init_creates_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("hotreload.yaml");

    hotreload_cmd()
        .arg("--config")
        .arg(&path)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created"));

    let config = ReloaderConfig::from_file(&path).unwrap();
    assert_eq!(config.run_mode, "dev");
    assert!(config.watch);
}

#[test]
fn test_init_refuses_to_overwrite() {
    let dir = project(&[]);

    hotreload_cmd()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    let content = fs::read_to_string(dir.path().join("hotreload.yaml")).unwrap();
    assert_eq!(content, CONFIG);
}

#[test]
fn test_init_force_overwrites() {
    let dir = project(&[]);

    hotreload_cmd()
        .current_dir(dir.path())
        .args(["init", "--force"])
        .assert()
        .success();

    let content = fs::read_to_string(dir.path().join("hotreload.yaml")).unwrap();
    assert_ne!(content, CONFIG);
}

// ============================================================================
// LIST
// ============================================================================

#[test]
fn test_list_prints_sorted_unit_names() {
    let dir = project(&[("app.Zeta", "class Zeta"), ("app.model.User", "class User")]);
    fs::write(dir.path().join("src/README.txt"), "not a unit").unwrap();

    hotreload_cmd()
        .current_dir(dir.path())
        .arg("list")
        .assert()
        .success()
        .stdout("app.Zeta\napp.model.User\n");
}

#[test]
fn test_list_with_explicit_config_path() {
    let dir = project(&[("app.Foo", "class Foo")]);
    let elsewhere = TempDir::new().unwrap();

    hotreload_cmd()
        .current_dir(elsewhere.path())
        .arg("-c")
        .arg(dir.path().join("hotreload.yaml"))
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("app.Foo"));
}

#[test]
fn test_invalid_config_fails() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("hotreload.yaml"), "sourceRoots: []\n").unwrap();

    hotreload_cmd()
        .current_dir(dir.path())
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("source root"));
}

#[test]
fn test_invalid_mode_override_fails() {
    let dir = project(&[]);

    hotreload_cmd()
        .current_dir(dir.path())
        .args(["--mode", "../escape", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("run mode"));
}

// ============================================================================
// STATUS
// ============================================================================

#[test]
fn test_status_reports_each_state() {
    let dir = project(&[
        ("app.Fresh", "class Fresh"),
        ("app.Stale", "class Stale"),
        ("app.Missing", "class Missing"),
        ("app.Corrupt", "class Corrupt"),
    ]);
    seed_entry(dir.path(), "app.Fresh");
    seed_entry(dir.path(), "app.Stale");
    seed_entry(dir.path(), "app.Corrupt");

    write_unit(dir.path(), "app.Stale", "class Stale\npublic edited()");
    let entry = open_cache(dir.path()).entry_path("app.Corrupt");
    fs::write(&entry, b"junk").unwrap();

    hotreload_cmd()
        .current_dir(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("fresh    app.Fresh"))
        .stdout(predicate::str::contains("stale    app.Stale"))
        .stdout(predicate::str::contains("missing  app.Missing"))
        .stdout(predicate::str::contains("corrupt  app.Corrupt"))
        .stdout(predicate::str::contains(
            "4 unit(s): 1 fresh, 1 stale, 1 missing, 1 corrupt",
        ));
}

#[test]
fn test_status_other_mode_sees_empty_partition() {
    let dir = project(&[("app.Foo", "class Foo")]);
    seed_entry(dir.path(), "app.Foo");

    hotreload_cmd()
        .current_dir(dir.path())
        .args(["--mode", "prod", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("missing  app.Foo"));
}

#[test]
fn test_status_does_not_create_cache() {
    let dir = project(&[("app.Foo", "class Foo")]);

    hotreload_cmd()
        .current_dir(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("missing  app.Foo"));

    assert!(!dir.path().join(".cache").exists());
}

#[test]
fn test_status_leaves_incompatible_cache_untouched() {
    let dir = project(&[("app.Foo", "class Foo")]);
    seed_entry(dir.path(), "app.Foo");
    let cache = open_cache(dir.path());
    let entry = cache.entry_path("app.Foo");
    fs::write(cache.partition().join(MANIFEST_FILE_NAME), b"not a manifest").unwrap();

    hotreload_cmd()
        .current_dir(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("missing  app.Foo"));
    assert!(entry.exists());

    hotreload_cmd()
        .current_dir(dir.path())
        .args(["inspect", "app.Foo"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No usable cache partition"));
    assert!(entry.exists());
}

// ============================================================================
// INSPECT
// ============================================================================

#[test]
fn test_inspect_prints_header() {
    let dir = project(&[("app.Foo", "class Foo")]);
    seed_entry(dir.path(), "app.Foo");

    hotreload_cmd()
        .current_dir(dir.path())
        .args(["inspect", "app.Foo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("unit:                  app.Foo"))
        .stdout(predicate::str::contains("bytecode:              10 bytes"))
        .stdout(predicate::str::contains("none"));
}

#[test]
fn test_inspect_json_output() {
    let dir = project(&[("app.Foo", "class Foo")]);
    seed_entry(dir.path(), "app.Foo");

    let output = hotreload_cmd()
        .current_dir(dir.path())
        .args(["inspect", "app.Foo", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["unit"], "app.Foo");
    assert_eq!(value["bytecodeLength"], 10);
    assert_eq!(value["sourceHash"].as_str().unwrap().len(), 64);
    assert!(value["dependencies"].as_array().unwrap().is_empty());
}

#[test]
fn test_inspect_missing_entry_fails() {
    let dir = project(&[("app.Foo", "class Foo"), ("app.Bar", "class Bar")]);
    seed_entry(dir.path(), "app.Bar");

    hotreload_cmd()
        .current_dir(dir.path())
        .args(["inspect", "app.Foo"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No cache entry for app.Foo"));
}

// ============================================================================
// CLEAR
// ============================================================================

#[test]
fn test_clear_removes_entries() {
    let dir = project(&[("app.Foo", "class Foo")]);
    seed_entry(dir.path(), "app.Foo");
    let entry = open_cache(dir.path()).entry_path("app.Foo");
    assert!(entry.exists());

    hotreload_cmd()
        .current_dir(dir.path())
        .arg("clear")
        .assert()
        .success()
        .stdout(predicate::str::contains("Cleared"));

    assert!(!entry.exists());
    hotreload_cmd()
        .current_dir(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("missing  app.Foo"));
}
