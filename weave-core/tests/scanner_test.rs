use std::fs;
use std::path::Path;
use std::time::Duration;

use tempfile::TempDir;
use weave_core::{DependencyGraph, Error, NodeKind, Scanner, WorkspaceConfig, WorkspaceProvider};

fn write_manifest(root: &Path, dir: &str, content: &str) {
    let path = root.join(dir);
    fs::create_dir_all(&path).unwrap();
    fs::write(path.join("weave.toml"), content).unwrap();
}

#[test]
fn test_scan_discovers_members() {
    let temp = TempDir::new().unwrap();
    write_manifest(
        temp.path(),
        "packages/core",
        r#"
name = "@acme/core"
version = "1.2.0"

[sources]
include = ["src"]
extensions = ["ts"]

[commands]
typecheck = "tsc --noEmit"
"#,
    );
    write_manifest(
        temp.path(),
        "services/api",
        r#"
name = "api"
kind = "service"

[deps]
internal = ["@acme/core"]
"#,
    );

    let scanner = Scanner::new(temp.path()).unwrap();
    let members = scanner.members().unwrap();

    assert_eq!(members.len(), 2);
    assert_eq!(members[0].name, "@acme/core");
    assert_eq!(members[0].kind, NodeKind::Package);
    assert_eq!(members[0].version.as_deref(), Some("1.2.0"));
    assert_eq!(members[0].sources.extensions, vec!["ts".to_string()]);
    assert_eq!(members[0].commands.typecheck.as_deref(), Some("tsc --noEmit"));
    assert_eq!(members[1].name, "api");
    assert_eq!(members[1].kind, NodeKind::Service);
    assert_eq!(members[1].deps.as_slice(), ["@acme/core".to_string()]);
    assert!(members[1].path.ends_with("services/api"));

    let graph = DependencyGraph::from_provider(&scanner).unwrap();
    assert_eq!(graph.topological_order(), ["@acme/core", "api"]);
}

#[test]
fn test_workspace_defaults_fill_missing_commands() {
    let temp = TempDir::new().unwrap();
    fs::write(
        temp.path().join("weave.toml"),
        r#"
[workspace]
cache_dir = "build/cache"
typecheck_timeout_secs = 120
watch_debounce_ms = 50

[workspace.commands]
typecheck = "tsc -p . --noEmit"
transpile = "swc src -d dist"
"#,
    )
    .unwrap();
    write_manifest(
        temp.path(),
        "core",
        r#"
name = "core"

[commands]
transpile = "esbuild src --outdir=dist"
"#,
    );

    let scanner = Scanner::new(temp.path()).unwrap();
    let config = scanner.config();
    assert_eq!(config.typecheck_timeout(), Some(Duration::from_secs(120)));
    assert_eq!(config.watch_debounce(), Duration::from_millis(50));
    assert_eq!(
        config.resolved_cache_dir(temp.path()),
        temp.path().join("build/cache")
    );

    let members = scanner.members().unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].commands.typecheck.as_deref(), Some("tsc -p . --noEmit"));
    assert_eq!(
        members[0].commands.transpile.as_deref(),
        Some("esbuild src --outdir=dist")
    );
}

#[test]
fn test_missing_root_config_uses_defaults() {
    let temp = TempDir::new().unwrap();
    let config = WorkspaceConfig::load(temp.path()).unwrap();
    assert_eq!(config.watch_debounce(), Duration::from_millis(300));
    assert_eq!(config.typecheck_timeout(), None);
    assert_eq!(
        config.resolved_cache_dir(temp.path()),
        temp.path().join(".weave/checksums")
    );
}

#[test]
fn test_ignored_directories_are_skipped() {
    let temp = TempDir::new().unwrap();
    write_manifest(temp.path(), "core", "name = \"core\"\n");
    write_manifest(temp.path(), "node_modules/dep", "name = \"dep\"\n");
    write_manifest(temp.path(), "core/dist", "name = \"copy\"\n");

    let members = Scanner::new(temp.path()).unwrap().members().unwrap();

    let names: Vec<&str> = members.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["core"]);
}

#[test]
fn test_max_depth_limits_discovery() {
    let temp = TempDir::new().unwrap();
    write_manifest(temp.path(), "a/b/c/d/deep", "name = \"deep\"\n");
    write_manifest(temp.path(), "shallow", "name = \"shallow\"\n");

    let members = Scanner::new(temp.path()).unwrap().members().unwrap();

    let names: Vec<&str> = members.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["shallow"]);
}

#[test]
fn test_invalid_version_is_rejected() {
    let temp = TempDir::new().unwrap();
    write_manifest(temp.path(), "core", "name = \"core\"\nversion = \"one\"\n");

    let result = Scanner::new(temp.path()).unwrap().members();
    assert!(matches!(result, Err(Error::InvalidVersion { .. })));
}

#[test]
fn test_malformed_manifest_names_the_file() {
    let temp = TempDir::new().unwrap();
    write_manifest(temp.path(), "core", "name = \n");

    match Scanner::new(temp.path()).unwrap().members() {
        Err(Error::Toml { context, .. }) => assert!(context.ends_with("weave.toml")),
        other => panic!("expected a TOML error, got {:?}", other.map(|m| m.len())),
    }
}

#[test]
fn test_unknown_kind_is_rejected() {
    let temp = TempDir::new().unwrap();
    write_manifest(temp.path(), "core", "name = \"core\"\nkind = \"library\"\n");

    assert!(Scanner::new(temp.path()).unwrap().members().is_err());
}
