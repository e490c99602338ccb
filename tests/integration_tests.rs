//! Integration tests for the talio binary.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create a talio Command
fn talio() -> Command {
    let mut cmd = cargo_bin_cmd!("talio");
    cmd.env_remove("TALIO_PORT")
        .env_remove("TALIO_DB_PATH")
        .env_remove("TALIO_ADMIN_PASSWORD");
    cmd
}

/// Helper to create a temporary project directory
fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

fn write_config(dir: &TempDir, content: &str) {
    fs::create_dir_all(dir.path().join(".talio")).unwrap();
    fs::write(dir.path().join(".talio/talio.toml"), content).unwrap();
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_talio_help() {
        talio()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("config"));
    }

    #[test]
    fn test_talio_version() {
        talio()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_unknown_command_fails() {
        talio().arg("frobnicate").assert().failure();
    }
}

// =============================================================================
// Serve Tests
// =============================================================================

mod serve {
    use super::*;

    #[test]
    fn test_serve_init_creates_database() {
        let dir = create_temp_project();

        talio()
            .current_dir(dir.path())
            .args(["serve", "--init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Board database initialized"));

        assert!(dir.path().join(".talio/talio.db").exists());
    }

    #[test]
    fn test_serve_init_custom_db_path() {
        let dir = create_temp_project();

        talio()
            .arg("--project-dir")
            .arg(dir.path())
            .args(["serve", "--init", "--db-path", "data/boards.db"])
            .assert()
            .success();

        assert!(dir.path().join("data/boards.db").exists());
        assert!(!dir.path().join(".talio/talio.db").exists());
    }

    #[test]
    fn test_serve_init_uses_env_db_path() {
        let dir = create_temp_project();
        let db = dir.path().join("from-env.db");

        talio()
            .current_dir(dir.path())
            .env("TALIO_DB_PATH", &db)
            .args(["serve", "--init"])
            .assert()
            .success();

        assert!(db.exists());
    }

    #[test]
    fn test_serve_init_is_idempotent() {
        let dir = create_temp_project();

        for _ in 0..2 {
            talio()
                .current_dir(dir.path())
                .args(["serve", "--init"])
                .assert()
                .success();
        }
    }

    #[test]
    fn test_serve_rejects_invalid_port() {
        talio()
            .args(["serve", "--port", "not-a-port"])
            .assert()
            .failure();
    }
}

// =============================================================================
// Config Tests
// =============================================================================

mod config {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = create_temp_project();

        talio()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No talio.toml found"))
            .stdout(predicate::str::contains("port = 3141"));
    }

    #[test]
    fn test_config_init_creates_toml() {
        let dir = create_temp_project();

        talio()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created talio.toml"));

        let content = fs::read_to_string(dir.path().join(".talio/talio.toml")).unwrap();
        assert!(content.contains("[server]"));
        assert!(content.contains("[longpoll]"));
    }

    #[test]
    fn test_config_init_does_not_overwrite() {
        let dir = create_temp_project();
        write_config(&dir, "[server]\nport = 4444\n");

        talio()
            .current_dir(dir.path())
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));

        let content = fs::read_to_string(dir.path().join(".talio/talio.toml")).unwrap();
        assert!(content.contains("4444"));
    }

    #[test]
    fn test_config_validate_no_config() {
        let dir = create_temp_project();

        talio()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Using defaults (valid)"));
    }

    #[test]
    fn test_config_validate_with_config() {
        let dir = create_temp_project();
        write_config(&dir, "[server]\nport = 8080\n\n[logging]\nlevel = \"debug\"\n");

        talio()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid"));
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let dir = create_temp_project();
        write_config(
            &dir,
            "[longpoll]\ndefault_timeout_ms = 120000\nmax_timeout_ms = 1000\n",
        );

        talio()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration warnings"))
            .stdout(predicate::str::contains("default_timeout_ms"));
    }

    #[test]
    fn test_config_shows_toml_content() {
        let dir = create_temp_project();
        write_config(
            &dir,
            "[server]\nport = 9999\n\n[security]\nadmin_password = \"hunter2\"\n",
        );

        talio()
            .current_dir(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("port = 9999"))
            .stdout(predicate::str::contains("admin_password = <set>"))
            .stdout(predicate::str::contains("hunter2").not());
    }

    #[test]
    fn test_config_show_reflects_env_port() {
        let dir = create_temp_project();

        talio()
            .current_dir(dir.path())
            .env("TALIO_PORT", "7070")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("port = 7070"));
    }

    #[test]
    fn test_config_invalid_toml_fails() {
        let dir = create_temp_project();
        write_config(&dir, "[server\nport = ");

        talio()
            .current_dir(dir.path())
            .args(["config", "validate"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("talio.toml"));
    }
}
