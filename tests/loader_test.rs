//! Integration tests for template lookup and memoization

use std::fs;
use std::sync::Arc;

use mint::{Config, Context, Error, Loader};
use tempfile::TempDir;

fn dir_with(name: &str, contents: &str) -> TempDir {
    let dir = TempDir::new().expect("Should create temp dir");
    fs::write(dir.path().join(name), contents).expect("Should write fixture");
    dir
}

#[test_log::test]
fn test_cached_template_survives_file_deletion() {
    let dir = dir_with("t.mint", "hello");
    let loader = Loader::with_config([dir.path()], Config::new());

    let first = loader.get_template("t.mint").expect("Should load");
    fs::remove_file(dir.path().join("t.mint")).expect("Should delete fixture");
    let second = loader.get_template("t.mint").expect("Cached template should not be re-read");

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(loader.cached_names(), vec!["t.mint".to_string()]);
}

#[test]
fn test_uncached_loader_rereads_files() {
    let dir = dir_with("t.mint", "hello");
    let loader = Loader::new([dir.path()]);

    loader.get_template("t.mint").expect("Should load");
    fs::remove_file(dir.path().join("t.mint")).expect("Should delete fixture");
    assert!(matches!(
        loader.get_template("t.mint"),
        Err(Error::NotFound { .. })
    ));
}

#[test]
fn test_missing_template_names_the_request() {
    let a = TempDir::new().expect("Should create temp dir");
    let b = TempDir::new().expect("Should create temp dir");
    let loader = Loader::new([a.path(), b.path()]);

    let err = loader.get_template("missing.tpl").unwrap_err();
    assert!(matches!(&err, Error::NotFound { name } if name == "missing.tpl"));
    assert_eq!(err.to_string(), "template not found: missing.tpl");
}

#[test]
fn test_first_search_dir_wins() {
    let a = dir_with("t", "from A");
    let b = dir_with("t", "from B");
    let loader = Loader::new([a.path(), b.path()]);
    let out = loader
        .get_template("t")
        .expect("Should load")
        .render(Context::new())
        .expect("Should render");
    assert_eq!(out, "from A");
}

#[test]
fn test_combined_loader_prefers_left_dirs() {
    let a = dir_with("t", "from A");
    let b = dir_with("t", "from B");
    let combined = Loader::new([a.path()]) + Loader::new([b.path()]);

    assert_eq!(combined.search_dirs(), vec![a.path().to_path_buf(), b.path().to_path_buf()]);
    let out = combined
        .get_template("t")
        .expect("Should load")
        .render(Context::new())
        .expect("Should render");
    assert_eq!(out, "from A");
}

#[test]
fn test_combined_loader_falls_back_to_right_dirs() {
    let a = TempDir::new().expect("Should create temp dir");
    let b = dir_with("only_b.mint", "from B");
    let combined = Loader::new([a.path()]) + Loader::new([b.path()]);
    let template = combined.get_template("only_b.mint").expect("Should load");
    assert_eq!(template.render(Context::new()).expect("Should render"), "from B");
}

#[test]
fn test_templates_in_subdirectories() {
    let dir = TempDir::new().expect("Should create temp dir");
    fs::create_dir(dir.path().join("pages")).expect("Should create dir");
    fs::write(dir.path().join("pages/home.mint"), "@h1 Home").expect("Should write fixture");

    let loader = Loader::new([dir.path()]);
    let out = loader
        .get_template("pages/home.mint")
        .expect("Should load")
        .render(Context::new())
        .expect("Should render");
    assert_eq!(out, "<h1>Home</h1>");
}

#[test]
fn test_loader_config_reaches_templates() {
    let dir = dir_with("t.mint", "@ul\n  @li a\n  @li b\n");
    let loader = Loader::with_config([dir.path()], Config::new().with_indent(2).with_cache(false));
    let template = loader.get_template("t.mint").expect("Should load");
    assert!(!template.cache_enabled());
    assert_eq!(
        template.render(Context::new()).expect("Should render"),
        "<ul><li>a</li><li>b</li></ul>"
    );
    // Uncached templates keep their source
    assert!(template.source().is_some());
}
