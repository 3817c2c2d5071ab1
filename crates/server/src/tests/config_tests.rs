use super::*;

use std::time::{SystemTime, UNIX_EPOCH};

#[test]
fn normalizes_plain_file_path_to_sqlite_url() {
    assert_eq!(
        normalize_database_url("./data/test.db"),
        "sqlite://./data/test.db"
    );
}

#[test]
fn keeps_memory_and_explicit_urls() {
    assert_eq!(normalize_database_url("sqlite::memory:"), "sqlite::memory:");
    assert_eq!(
        normalize_database_url("sqlite://db/members.db?mode=rwc"),
        "sqlite://db/members.db?mode=rwc"
    );
    assert_eq!(
        normalize_database_url("   "),
        Settings::default().database_url
    );
}

#[test]
fn normalizing_leaves_the_filesystem_alone() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let parent = std::env::temp_dir().join(format!("member_server_test_{suffix}"));
    let db_path = parent.join("test.db");

    let database_url = normalize_database_url(db_path.to_string_lossy().as_ref());
    assert!(database_url.starts_with("sqlite://"));
    assert!(!parent.exists());
}

#[test]
fn file_overrides_accept_strings_and_integers() {
    let mut settings = Settings::default();
    apply_file_overrides(
        &mut settings,
        r#"
bind_addr = "0.0.0.0:9000"
token_secret = "from-file"
access_token_ttl_seconds = 60
"#,
    );
    assert_eq!(settings.server_bind, "0.0.0.0:9000");
    assert_eq!(settings.token_secret, "from-file");
    assert_eq!(settings.access_token_ttl_seconds, 60);
    assert_eq!(
        settings.refresh_token_ttl_seconds,
        Settings::default().refresh_token_ttl_seconds
    );
}

#[test]
fn prefixed_env_vars_win_over_short_names() {
    let mut settings = Settings::default();
    let env: HashMap<&str, &str> = [
        ("SERVER_BIND", "127.0.0.1:1"),
        ("APP__BIND_ADDR", "127.0.0.1:2"),
        ("TOKEN_SECRET", "short"),
        ("APP__ACCESS_TOKEN_TTL_SECONDS", "not-a-number"),
    ]
    .into_iter()
    .collect();

    apply_env_overrides(&mut settings, |key| env.get(key).map(|v| v.to_string()));
    assert_eq!(settings.server_bind, "127.0.0.1:2");
    assert_eq!(settings.token_secret, "short");
    assert_eq!(
        settings.access_token_ttl_seconds,
        Settings::default().access_token_ttl_seconds
    );
}
