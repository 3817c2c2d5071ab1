use storage::{CredentialStore, KeyValueStore};

#[tokio::test]
async fn credentials_survive_reopening_the_database() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("client").join("credentials.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    {
        let storage = CredentialStore::open(&database_url).await.expect("open");
        storage
            .set_values(&[("accessToken", "access-1"), ("refreshToken", "refresh-1")])
            .await
            .expect("write");
        storage.pool().close().await;
    }

    let reopened = CredentialStore::open(&database_url).await.expect("reopen");
    assert_eq!(
        reopened
            .get_value("accessToken")
            .await
            .expect("read")
            .as_deref(),
        Some("access-1")
    );

    reopened
        .remove_values(&["accessToken", "refreshToken"])
        .await
        .expect("clear");
    reopened.pool().close().await;

    let cleared = CredentialStore::open(&database_url).await.expect("reopen again");
    assert!(cleared.get_value("accessToken").await.expect("read").is_none());
    assert!(cleared.get_value("refreshToken").await.expect("read").is_none());
}
