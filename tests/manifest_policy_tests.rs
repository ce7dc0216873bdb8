#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Manifest policy tests for duel-poll.
//!
//! These tests parse `Cargo.toml` and check that the panic-free lint policy,
//! feature layout, and demo targets have not drifted. All checks are
//! synchronous filesystem reads.

use std::path::PathBuf;

/// Returns the project root directory (where Cargo.toml lives).
fn project_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

/// Parse the project manifest.
fn manifest() -> toml::Table {
    let path = project_root().join("Cargo.toml");
    let text = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read '{}': {e}", path.display()));
    toml::from_str(&text).expect("Cargo.toml must be valid TOML")
}

fn table<'a>(parent: &'a toml::Table, key: &str) -> &'a toml::Table {
    parent
        .get(key)
        .and_then(toml::Value::as_table)
        .unwrap_or_else(|| panic!("Cargo.toml is missing the [{key}] table"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Module: panic_policy
// ─────────────────────────────────────────────────────────────────────────────

mod panic_policy {
    use super::*;

    const REQUIRED_DENY_LINTS: &[&str] = &[
        "unwrap_used",
        "expect_used",
        "panic",
        "todo",
        "unimplemented",
        "indexing_slicing",
    ];

    #[test]
    fn cargo_toml_denies_all_panic_prone_lints() {
        let manifest = manifest();
        let clippy = table(table(&manifest, "lints"), "clippy");

        for lint in REQUIRED_DENY_LINTS {
            assert_eq!(
                clippy.get(*lint).and_then(toml::Value::as_str),
                Some("deny"),
                "Cargo.toml must set `{lint} = \"deny\"` in [lints.clippy] so \
                 library code stays panic-free."
            );
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Module: feature_policy
// ─────────────────────────────────────────────────────────────────────────────

mod feature_policy {
    use super::*;

    #[test]
    fn websocket_transport_is_default_and_optional() {
        let manifest = manifest();
        let features = table(&manifest, "features");

        let default: Vec<&str> = features["default"]
            .as_array()
            .expect("default feature list")
            .iter()
            .filter_map(toml::Value::as_str)
            .collect();
        assert_eq!(default, ["transport-websocket"]);

        let deps = table(&manifest, "dependencies");
        for dep in ["tokio-tungstenite", "futures-util"] {
            let optional = deps[dep]
                .as_table()
                .and_then(|t| t.get("optional"))
                .and_then(toml::Value::as_bool);
            assert_eq!(
                optional,
                Some(true),
                "`{dep}` must stay optional behind transport-websocket"
            );
        }
    }

    #[test]
    fn core_runtime_does_not_pull_full_tokio() {
        let manifest = manifest();
        let tokio = table(&manifest, "dependencies")["tokio"]
            .as_table()
            .expect("tokio dependency table");
        let features: Vec<&str> = tokio["features"]
            .as_array()
            .expect("tokio features")
            .iter()
            .filter_map(toml::Value::as_str)
            .collect();
        assert!(!features.contains(&"full"));
        assert!(features.contains(&"time"), "the round timer needs tokio time");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Module: demo_targets
// ─────────────────────────────────────────────────────────────────────────────

mod demo_targets {
    use super::*;

    #[test]
    fn every_declared_demo_exists() {
        let manifest = manifest();
        let examples = manifest["example"]
            .as_array()
            .expect("Cargo.toml declares [[example]] targets");
        assert!(!examples.is_empty());

        for example in examples {
            let path = example["path"].as_str().expect("example path");
            assert!(
                project_root().join(path).is_file(),
                "declared example '{path}' does not exist"
            );
            assert!(path.starts_with("demos/"), "demos live under demos/");
        }
    }

    #[test]
    fn automatic_example_discovery_is_off() {
        let manifest = manifest();
        let package = table(&manifest, "package");
        assert_eq!(
            package.get("autoexamples").and_then(toml::Value::as_bool),
            Some(false)
        );
    }
}
