//! Integration tests for Porchlet

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn porchlet() -> Command {
        let mut cmd = cargo_bin_cmd!("porchlet");
        cmd.env_remove("PORCHLET_FN_RUNTIME");
        cmd.env_remove("PORCHLET_CONFIG");
        cmd
    }

    /// A command reading its config (and repositories file) from `dir`
    fn porchlet_in(dir: &Path) -> Command {
        let mut cmd = porchlet();
        cmd.arg("--config").arg(dir.join("config.toml"));
        cmd
    }

    #[test]
    fn help_displays() {
        porchlet()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("package orchestration"));
    }

    #[test]
    fn version_displays() {
        porchlet()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("porchlet"));
    }

    #[test]
    fn config_path_follows_flag() {
        let temp = TempDir::new().unwrap();
        porchlet_in(temp.path())
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"))
            .stdout(predicate::str::contains("repositories.toml"));
    }

    #[test]
    fn config_show_defaults() {
        let temp = TempDir::new().unwrap();
        porchlet_in(temp.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[runtime]"))
            .stdout(predicate::str::contains("gcr.io/kpt-fn/"));
    }

    #[test]
    fn config_init_writes_file() {
        let temp = TempDir::new().unwrap();
        porchlet_in(temp.path())
            .args(["config", "init"])
            .assert()
            .success();
        assert!(temp.path().join("config.toml").exists());
    }

    #[test]
    fn malformed_config_is_reported() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("config.toml"), "[runtime\nengine =").unwrap();
        porchlet_in(temp.path())
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Error:"));
    }

    #[test]
    fn rpkg_list_without_repositories_is_empty() {
        let temp = TempDir::new().unwrap();
        porchlet_in(temp.path())
            .args(["rpkg", "list", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[]"));
    }

    #[test]
    fn rpkg_list_ignores_unusable_runtime() {
        let temp = TempDir::new().unwrap();
        porchlet_in(temp.path())
            .env("PORCHLET_FN_RUNTIME", "bogus")
            .args(["rpkg", "list", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[]"));
    }

    #[test]
    fn rpkg_get_rejects_malformed_name() {
        let temp = TempDir::new().unwrap();
        porchlet_in(temp.path())
            .args(["rpkg", "get", "not-a-revision"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("invalid name"));
    }

    #[test]
    fn rpkg_get_unknown_repository_is_not_found() {
        let temp = TempDir::new().unwrap();
        let name = format!("blueprints-{}", "0".repeat(40));
        porchlet_in(temp.path())
            .args(["rpkg", "get", &name])
            .assert()
            .failure()
            .stderr(predicate::str::contains("not found"));
    }

    #[test]
    fn rpkg_list_rejects_bad_selector() {
        let temp = TempDir::new().unwrap();
        porchlet_in(temp.path())
            .args(["rpkg", "list", "--selector", "metadata.labels=x"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Error:"));
    }

    #[test]
    fn unsupported_runtime_is_reported() {
        let temp = TempDir::new().unwrap();
        porchlet_in(temp.path())
            .env("PORCHLET_FN_RUNTIME", "containerd")
            .args(["fn", "eval", "set-namespace:v0.4"])
            .arg(temp.path())
            .assert()
            .failure()
            .stderr(predicate::str::contains("unsupported runtime"))
            .stderr(predicate::str::contains("Hint:"));
    }

    #[test]
    fn unknown_subcommand_fails() {
        porchlet().arg("nonexistent").assert().failure();
    }
}
