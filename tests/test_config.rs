use std::time::Duration;

use clap::Parser;
use harbor::cli::Cli;
use harbor::config::{ConfigError, DispatchMode, ServerConfig, Settings};

#[test]
fn test_config_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = ServerConfig::with_root(dir.path()).unwrap();

    assert_eq!(cfg.bind_addr.to_string(), "127.0.0.1:8000");
    assert_eq!(cfg.backlog, 1024);
    assert_eq!(cfg.max_connections, 256);
    assert_eq!(cfg.dispatch, DispatchMode::Task);
    assert_eq!(cfg.request_timeout, Duration::from_secs(30));
    assert_eq!(cfg.drain_timeout, Duration::from_secs(10));
    assert_eq!(cfg.limits.max_header_bytes, 8192);
    assert_eq!(cfg.index_files, vec!["index.html", "index.htm"]);
    assert!(cfg.directory_listing);
}

#[test]
fn test_config_root_is_canonical() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("site")).unwrap();

    let cfg = ServerConfig::with_root(dir.path().join("site/../site")).unwrap();
    assert_eq!(cfg.root, dir.path().join("site").canonicalize().unwrap());
}

#[test]
fn test_config_from_yaml() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = format!(
        r#"
server:
  bind: "0.0.0.0"
  port: 9090
  dispatch: pool
  max_connections: 8
  queue_capacity: 4
limits:
  request_timeout_secs: 5
static_files:
  root: {}
  directory_listing: false
"#,
        dir.path().display()
    );

    let cfg = Settings::from_yaml(&yaml).unwrap().into_config().unwrap();

    assert_eq!(cfg.bind_addr.to_string(), "0.0.0.0:9090");
    assert_eq!(cfg.dispatch, DispatchMode::Pool);
    assert_eq!(cfg.max_connections, 8);
    assert_eq!(cfg.queue_capacity, 4);
    assert_eq!(cfg.request_timeout, Duration::from_secs(5));
    // Untouched keys keep their defaults.
    assert_eq!(cfg.write_timeout, Duration::from_secs(30));
    assert!(!cfg.directory_listing);
}

#[test]
fn test_config_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("harbor.yaml");
    std::fs::write(&path, "server:\n  port: 8181\n").unwrap();

    let settings = Settings::from_file(&path).unwrap();
    assert_eq!(settings.server.port, 8181);

    let missing = Settings::from_file(&dir.path().join("nope.yaml")).unwrap_err();
    assert!(matches!(missing, ConfigError::Read { .. }));
}

#[test]
fn test_config_rejects_unknown_keys() {
    let err = Settings::from_yaml("server:\n  prot: 80\n").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn test_config_ipv6_bind() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = Settings::default();
    settings.server.bind = "[::1]".to_string();
    settings.static_files.root = dir.path().to_path_buf();

    let cfg = settings.into_config().unwrap();
    assert_eq!(cfg.bind_addr.to_string(), "[::1]:8000");
}

#[test]
fn test_config_rejects_invalid_values() {
    let dir = tempfile::tempdir().unwrap();
    let base = || {
        let mut settings = Settings::default();
        settings.static_files.root = dir.path().to_path_buf();
        settings
    };

    let mut bad_bind = base();
    bad_bind.server.bind = "localhost:80".to_string();
    assert!(matches!(
        bad_bind.into_config().unwrap_err(),
        ConfigError::InvalidBind(_)
    ));

    let mut no_connections = base();
    no_connections.server.max_connections = 0;
    assert!(matches!(
        no_connections.into_config().unwrap_err(),
        ConfigError::Invalid(_)
    ));

    let mut no_queue = base();
    no_queue.server.dispatch = DispatchMode::Pool;
    no_queue.server.queue_capacity = 0;
    assert!(matches!(
        no_queue.into_config().unwrap_err(),
        ConfigError::Invalid(_)
    ));

    let mut no_timeout = base();
    no_timeout.limits.write_timeout_secs = 0;
    assert!(matches!(
        no_timeout.into_config().unwrap_err(),
        ConfigError::Invalid(_)
    ));
}

#[test]
fn test_config_root_must_exist_and_be_directory() {
    let dir = tempfile::tempdir().unwrap();

    let missing = ServerConfig::with_root(dir.path().join("missing")).unwrap_err();
    assert!(matches!(missing, ConfigError::Root { .. }));

    let file = dir.path().join("file.txt");
    std::fs::write(&file, "x").unwrap();
    let not_dir = ServerConfig::with_root(&file).unwrap_err();
    assert!(matches!(not_dir, ConfigError::RootNotDirectory(_)));
}

#[test]
fn test_cli_overrides_settings() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_str().unwrap();
    let cli = Cli::try_parse_from([
        "harbor",
        "9000",
        "-d",
        root,
        "--bind",
        "0.0.0.0",
        "--dispatch",
        "pool",
        "--max-connections",
        "2",
        "--queue-capacity",
        "3",
        "--drain-timeout",
        "1",
        "--no-listing",
    ])
    .unwrap();

    let cfg = cli.settings().unwrap().into_config().unwrap();

    assert_eq!(cfg.bind_addr.to_string(), "0.0.0.0:9000");
    assert_eq!(cfg.root, dir.path().canonicalize().unwrap());
    assert_eq!(cfg.dispatch, DispatchMode::Pool);
    assert_eq!(cfg.max_connections, 2);
    assert_eq!(cfg.queue_capacity, 3);
    assert_eq!(cfg.drain_timeout, Duration::from_secs(1));
    assert!(!cfg.directory_listing);
}

#[test]
fn test_cli_flags_take_precedence_over_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("harbor.yaml");
    std::fs::write(&path, "server:\n  port: 7000\n  backlog: 16\n").unwrap();

    let cli = Cli::try_parse_from(["harbor", "7001", "--config", path.to_str().unwrap()]).unwrap();
    let settings = cli.settings().unwrap();

    assert_eq!(settings.server.port, 7001);
    assert_eq!(settings.server.backlog, 16);
}

#[test]
fn test_cli_rejects_bad_port() {
    assert!(Cli::try_parse_from(["harbor", "99999"]).is_err());
    assert!(Cli::try_parse_from(["harbor", "--dispatch", "threads"]).is_err());
}
