// ABOUTME: Tests for resolving server configuration from a TOML file and overrides
// ABOUTME: Covers precedence, defaults and rejection of bad values

use std::io::Write;
use std::path::PathBuf;

use metadata_sync::config::{FileConfig, ServeConfig, ServeOverrides, DEFAULT_CONNECT_RETRIES};
use sync_engine::publisher::DEFAULT_PUBLISHER_CAPACITY;
use sync_engine::session::DEFAULT_SESSION_BUFFER;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn overrides_with_token() -> ServeOverrides {
    ServeOverrides {
        token_file: Some(PathBuf::from("/run/secrets/sync-token")),
        ..Default::default()
    }
}

#[test]
fn file_values_are_used_when_no_overrides() {
    let file = write_config(
        r#"
listen = "0.0.0.0:7000"
database_url = "postgresql://sync@db.internal:5432/metadata"
token_file = "/etc/metadata-sync/token"
publisher_capacity = 32
session_buffer = 4
connect_retries = 2
"#,
    );
    let file_config = FileConfig::load(file.path()).unwrap();
    let config = ServeConfig::resolve(ServeOverrides::default(), file_config).unwrap();

    assert_eq!(config.listen, "0.0.0.0:7000".parse().unwrap());
    assert_eq!(config.database_url, "postgresql://sync@db.internal:5432/metadata");
    assert_eq!(config.token_file, PathBuf::from("/etc/metadata-sync/token"));
    assert_eq!(config.publisher_capacity, 32);
    assert_eq!(config.session_buffer, 4);
    assert_eq!(config.connect_retries, 2);
    assert!(!config.allow_self_signed_certs);
}

#[test]
fn overrides_win_over_file() {
    let file = write_config(
        r#"
listen = "0.0.0.0:7000"
database_url = "postgresql://sync@db.internal/metadata"
session_buffer = 4
"#,
    );
    let file_config = FileConfig::load(file.path()).unwrap();
    let overrides = ServeOverrides {
        listen: Some("tcp:7100".into()),
        database_url: Some("postgresql://sync@localhost/override".into()),
        session_buffer: Some(16),
        allow_self_signed_certs: true,
        ..overrides_with_token()
    };
    let config = ServeConfig::resolve(overrides, file_config).unwrap();

    assert_eq!(config.listen, "127.0.0.1:7100".parse().unwrap());
    assert_eq!(config.database_url, "postgresql://sync@localhost/override");
    assert_eq!(config.session_buffer, 16);
    assert!(config.allow_self_signed_certs);
}

#[test]
fn defaults_fill_missing_values() {
    let overrides = ServeOverrides {
        database_url: Some("postgresql://sync@localhost/metadata".into()),
        ..overrides_with_token()
    };
    let config = ServeConfig::resolve(overrides, FileConfig::default()).unwrap();

    assert_eq!(config.listen, "127.0.0.1:50061".parse().unwrap());
    assert_eq!(config.publisher_capacity, DEFAULT_PUBLISHER_CAPACITY);
    assert_eq!(config.session_buffer, DEFAULT_SESSION_BUFFER);
    assert_eq!(config.connect_retries, DEFAULT_CONNECT_RETRIES);
}

#[test]
fn missing_database_url_is_an_error() {
    let err = ServeConfig::resolve(overrides_with_token(), FileConfig::default()).unwrap_err();
    assert!(err.to_string().contains("database URL not provided"));
}

#[test]
fn zero_sizes_are_rejected() {
    let base = ServeOverrides {
        database_url: Some("postgresql://sync@localhost/metadata".into()),
        ..overrides_with_token()
    };

    let zero_capacity = ServeOverrides {
        publisher_capacity: Some(0),
        ..base.clone()
    };
    assert!(ServeConfig::resolve(zero_capacity, FileConfig::default()).is_err());

    let zero_buffer = ServeOverrides {
        session_buffer: Some(0),
        ..base
    };
    assert!(ServeConfig::resolve(zero_buffer, FileConfig::default()).is_err());
}

#[test]
fn unknown_keys_are_rejected() {
    let file = write_config("listen = \"tcp:7000\"\nreplication_slot = \"x\"\n");
    assert!(FileConfig::load(file.path()).is_err());
}

#[test]
fn non_postgres_url_is_rejected() {
    let overrides = ServeOverrides {
        database_url: Some("mysql://sync@localhost/metadata".into()),
        ..overrides_with_token()
    };
    assert!(ServeConfig::resolve(overrides, FileConfig::default()).is_err());
}
