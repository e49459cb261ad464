//! Config files loaded through `rewind-data` and applied to core walks.

use std::fs;

use rewind_core::config::{RewindConfig, WalkConfig};
use rewind_core::serialize::{DeserializeContext, SerializeContext, WalkError};
use rewind_core::test_utils::*;
use rewind_data::{ConfigLoadError, load_config};

#[test]
fn same_config_in_every_format() {
    let dir = tempfile::tempdir().unwrap();
    let ron = dir.path().join("a.ron");
    let toml = dir.path().join("b.toml");
    let json = dir.path().join("c.json");
    fs::write(&ron, "(walk: (max_depth: 40), loop: (max_comment_len: 100))").unwrap();
    fs::write(&toml, "[walk]\nmax_depth = 40\n[loop]\nmax_comment_len = 100\n").unwrap();
    fs::write(
        &json,
        r#"{"walk": {"max_depth": 40}, "loop": {"max_comment_len": 100}}"#,
    )
    .unwrap();

    let configs: Vec<RewindConfig> = [ron, toml, json]
        .iter()
        .map(|p| load_config(p).unwrap())
        .collect();
    assert_eq!(configs[0], configs[1]);
    assert_eq!(configs[1], configs[2]);
    assert_eq!(configs[0].walk.max_depth, 40);
}

#[test]
fn loaded_limits_apply_to_walks() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tight.toml");
    fs::write(&path, "[walk]\nmax_depth = 2\nmax_sequence_len = 4\n").unwrap();
    let config = load_config(&path).unwrap();

    let reg = sample_registry().unwrap();
    let world = sample_world();

    // alice -> bob -> bob's motor is three reference levels.
    let depth_only = WalkConfig {
        max_depth: config.walk.max_depth,
        ..WalkConfig::default()
    };
    let err = SerializeContext::new(&reg)
        .with_config(depth_only)
        .snapshot(&world)
        .unwrap_err();
    assert!(matches!(err, WalkError::DepthExceeded(2)));

    // The settings blob is longer than the four-byte sequence limit, on
    // both the writing and the reading side.
    let err = SerializeContext::new(&reg)
        .with_config(config.walk)
        .snapshot(&world)
        .unwrap_err();
    assert!(matches!(err, WalkError::LengthLimit { max: 4, .. }));

    let bytes = rewind_core::snapshot(&reg, &world).unwrap();
    let err = DeserializeContext::new(&reg)
        .with_config(config.walk)
        .restore::<World>(&bytes)
        .unwrap_err();
    assert!(matches!(err, WalkError::LengthLimit { max: 4, .. }));
    release_world(&world);
}

#[test]
fn payload_limit_above_i32_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("huge.json");
    fs::write(&path, r#"{"loop": {"max_payload_len": 4294967296}}"#).unwrap();
    assert!(matches!(
        load_config(&path),
        Err(ConfigLoadError::Invalid { .. })
    ));
}
