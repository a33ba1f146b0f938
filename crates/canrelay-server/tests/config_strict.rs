#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::io::Write;

use canrelay_server::config;
use canrelay_server::mapping::MappingResolver;
use canrelay_server::{RelayServer, RelayConfig};
use canrelay_server::sink::MemorySink;
use std::sync::Arc;

#[test]
fn deny_unknown_fields_nested() {
    let bad = r#"
version: 1
server:
  host: "127.0.0.1"
  prot: 9877 # typo should fail
"#;

    let err = config::load_from_str(bad).expect_err("must fail");
    assert_eq!(err.code().as_str(), "CONFIGURATION");
}

#[test]
fn ok_minimal_config() {
    let ok = r#"
version: 1
"#;
    let cfg = config::load_from_str(ok).expect("must parse");
    assert_eq!(cfg.version, 1);
    assert_eq!(cfg.server.port, 9877);
    assert_eq!(cfg.server.host, "127.0.0.1");
    assert_eq!(cfg.classifier.warn_load_percent, 50.0);
    assert_eq!(cfg.classifier.error_load_percent, 80.0);
    assert!(cfg.ops.listen.is_none());
}

#[test]
fn invalid_port_is_rejected() {
    let bad = r#"
version: 1
server:
  port: 0
"#;
    let err = config::load_from_str(bad).expect_err("port 0 must fail");
    assert_eq!(err.code().as_str(), "CONFIGURATION");

    let out_of_range = r#"
version: 1
server:
  port: 70000
"#;
    assert!(config::load_from_str(out_of_range).is_err());
}

#[test]
fn inverted_thresholds_are_rejected() {
    let bad = r#"
version: 1
classifier:
  warn_load_percent: 90
  error_load_percent: 80
"#;
    assert!(config::load_from_str(bad).is_err());
}

#[test]
fn bad_ops_listen_is_rejected() {
    let bad = r#"
version: 1
ops:
  listen: "not-an-address"
"#;
    assert!(config::load_from_str(bad).is_err());
}

#[test]
fn unsupported_version_is_rejected() {
    assert!(config::load_from_str("version: 2\n").is_err());
}

#[test]
fn inline_labels_feed_the_static_layer() {
    let ok = r#"
version: 1
mapping:
  labels:
    1: "shoulder_joint"
    2: "elbow_joint"
"#;
    let cfg = config::load_from_str(ok).unwrap();
    let resolver = MappingResolver::from_config(&cfg.mapping).unwrap();
    assert_eq!(resolver.label(2), "elbow_joint");
    assert_eq!(resolver.label(3), "id_3");
}

#[test]
fn static_mapping_file_is_loaded() {
    let path = std::env::temp_dir().join(format!("canrelay-labels-{}.yaml", std::process::id()));
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(f, "labels:\n  17: \"shoulder_response\"\n  1: \"from_file\"").unwrap();
    drop(f);

    let cfg = config::load_from_str(&format!(
        "version: 1\nmapping:\n  file: \"{}\"\n  labels:\n    1: \"inline\"\n",
        path.display()
    ))
    .unwrap();
    let resolver = MappingResolver::from_config(&cfg.mapping).unwrap();
    assert_eq!(resolver.label(17), "shoulder_response");
    assert_eq!(resolver.label(1), "from_file");

    let _ = std::fs::remove_file(&path);
}

#[test]
fn missing_static_mapping_file_is_fatal() {
    let mut cfg = RelayConfig::default();
    cfg.mapping.file = Some("/nonexistent/canrelay/labels.yaml".into());
    let err = RelayServer::new(cfg, Arc::new(MemorySink::new())).err().expect("must fail");
    assert_eq!(err.code().as_str(), "CONFIGURATION");
    assert!(!err.is_local());
}

#[test]
fn idle_timeout_below_one_second_is_rejected() {
    let bad = r#"
version: 1
server:
  idle_timeout_ms: 500
"#;
    let err = config::load_from_str(bad).expect_err("sub-second idle timeout must fail");
    assert!(err.to_string().contains("idle_timeout_ms"));
}
