//! Shared setup and backend-agnostic scenarios for datastore tests.
//!
//! Postgres tests need `DATABASE_TEST_URL`; without it they return early.
//! They share one database, so each holds [`DB_LOCK`] for its whole run.

#![allow(dead_code)]

use fleet_datastore::{
    Datastore, DatastoreError, EntityKind, NewFimSection, NewYaraSignatureGroup, PgDatastore,
};
use sqlx::PgPool;
use tokio::sync::{Mutex, MutexGuard};

static DB_LOCK: Mutex<()> = Mutex::const_new(());

/// A migrated, empty Postgres store, or `None` if no test database is set.
pub async fn test_store() -> Option<(MutexGuard<'static, ()>, PgDatastore)> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    let guard = DB_LOCK.lock().await;

    let pool = PgPool::connect(&url).await.ok()?;
    let store = PgDatastore::new(pool);
    store.migrate().await.ok()?;

    // Clean slate for each test
    sqlx::query(
        r#"
        TRUNCATE yara_file_paths, yara_signature_paths, yara_signature_groups,
                 fim_section_paths, fim_sections
        RESTART IDENTITY CASCADE
        "#,
    )
    .execute(store.pool())
    .await
    .ok()?;

    Some((guard, store))
}

pub fn fp1() -> NewFimSection {
    NewFimSection::new("fp1", ["path1", "path2", "path3"])
}

pub fn sig1() -> NewYaraSignatureGroup {
    NewYaraSignatureGroup::new("sig1", ["path1", "path2"])
}

pub fn sig2() -> NewYaraSignatureGroup {
    NewYaraSignatureGroup::new("sig2", ["path3"])
}

// =========================================================================
// Scenarios run against every backend
// =========================================================================

pub async fn yara_store(ds: &dyn Datastore) {
    let group = ds.new_yara_signature_group(sig1(), None).await.unwrap();
    assert!(group.id > 0);
    assert_eq!(group.signature_name, "sig1");

    let section = ds.new_fim_section(fp1(), None).await.unwrap();
    assert!(section.id > 0);
    assert_eq!(section.paths, vec!["path1", "path2", "path3"]);

    ds.new_yara_file_path("fp1", "sig1", None).await.unwrap();

    let yara = ds.yara_section().await.unwrap();
    assert_eq!(yara.file_paths.len(), 1);
    assert_eq!(yara.file_paths["fp1"], vec!["sig1"]);
    assert_eq!(yara.signatures.len(), 1);
    assert_eq!(yara.signatures["sig1"], vec!["path1", "path2"]);

    // A group without associations still shows up with its own paths.
    let second = ds.new_yara_signature_group(sig2(), None).await.unwrap();
    assert!(second.id > 0);
    assert_ne!(second.id, group.id);

    let yara = ds.yara_section().await.unwrap();
    assert_eq!(yara.signatures["sig2"], vec!["path3"]);
    assert_eq!(yara.file_paths["fp1"], vec!["sig1"]);

    ds.new_yara_file_path("fp1", "sig2", None).await.unwrap();

    let yara = ds.yara_section().await.unwrap();
    assert_eq!(yara.file_paths["fp1"], vec!["sig1", "sig2"]);
    assert_eq!(yara.signatures["sig1"].len(), 2);
    assert_eq!(yara.signatures["sig2"].len(), 1);
}

pub async fn yara_transactions(ds: &dyn Datastore) {
    if !ds.supports_transactions() {
        let err = ds.begin().await.unwrap_err();
        assert!(matches!(err, DatastoreError::Unsupported(_)));
        return;
    }

    ds.new_yara_signature_group(sig1(), None).await.unwrap();
    ds.new_fim_section(fp1(), None).await.unwrap();

    let mut tx = ds.begin().await.unwrap();
    ds.new_yara_file_path("fp1", "sig1", Some(&mut tx))
        .await
        .unwrap();
    tx.rollback().await.unwrap();

    let yara = ds.yara_section().await.unwrap();
    assert!(yara.file_paths.is_empty(), "rolled back association persisted");

    let mut tx = ds.begin().await.unwrap();
    ds.new_yara_file_path("fp1", "sig1", Some(&mut tx))
        .await
        .unwrap();
    assert_eq!(tx.writes(), 1);
    tx.commit().await.unwrap();

    let yara = ds.yara_section().await.unwrap();
    assert_eq!(yara.file_paths.len(), 1);
    assert_eq!(yara.file_paths["fp1"], vec!["sig1"]);
}

pub async fn empty_store(ds: &dyn Datastore) {
    let yara = ds.yara_section().await.unwrap();
    assert!(yara.file_paths.is_empty());
    assert!(yara.signatures.is_empty());
    assert!(ds.fim_sections().await.unwrap().is_empty());
}

pub async fn unknown_names_are_not_found(ds: &dyn Datastore) {
    ds.new_fim_section(fp1(), None).await.unwrap();
    ds.new_yara_signature_group(sig1(), None).await.unwrap();

    let err = ds
        .new_yara_file_path("missing", "sig1", None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DatastoreError::NotFound { kind: EntityKind::FimSection, ref name } if name == "missing"
    ));

    let err = ds
        .new_yara_file_path("fp1", "missing", None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DatastoreError::NotFound {
            kind: EntityKind::YaraSignatureGroup,
            ref name,
        } if name == "missing"
    ));

    assert!(ds.yara_section().await.unwrap().file_paths.is_empty());
}

pub async fn duplicate_names_are_rejected(ds: &dyn Datastore) {
    ds.new_fim_section(fp1(), None).await.unwrap();
    let err = ds
        .new_fim_section(NewFimSection::new("fp1", ["/other"]), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DatastoreError::DuplicateName { kind: EntityKind::FimSection, .. }
    ));

    ds.new_yara_signature_group(sig1(), None).await.unwrap();
    let err = ds
        .new_yara_signature_group(NewYaraSignatureGroup::new("sig1", ["/other"]), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DatastoreError::DuplicateName { kind: EntityKind::YaraSignatureGroup, .. }
    ));

    // The original rows are untouched.
    let sections = ds.fim_sections().await.unwrap();
    assert_eq!(sections["fp1"], vec!["path1", "path2", "path3"]);
    let yara = ds.yara_section().await.unwrap();
    assert_eq!(yara.signatures["sig1"], vec!["path1", "path2"]);
}

pub async fn names_are_case_sensitive(ds: &dyn Datastore) {
    ds.new_fim_section(fp1(), None).await.unwrap();
    ds.new_fim_section(NewFimSection::new("FP1", ["/upper"]), None)
        .await
        .unwrap();

    let sections = ds.fim_sections().await.unwrap();
    assert_eq!(sections.len(), 2);
    assert_eq!(sections["FP1"], vec!["/upper"]);
}

pub async fn invalid_input_is_rejected(ds: &dyn Datastore) {
    let err = ds
        .new_fim_section(NewFimSection::new("", ["/etc"]), None)
        .await
        .unwrap_err();
    assert!(matches!(err, DatastoreError::Validation(_)));

    let err = ds
        .new_yara_signature_group(NewYaraSignatureGroup::new("sig1", Vec::<String>::new()), None)
        .await
        .unwrap_err();
    assert!(matches!(err, DatastoreError::Validation(_)));

    empty_store(ds).await;
}

pub async fn nul_bytes_are_rejected(ds: &dyn Datastore) {
    let err = ds
        .new_fim_section(NewFimSection::new("x", ["a\0b"]), None)
        .await
        .unwrap_err();
    assert!(matches!(err, DatastoreError::Validation(_)), "{err:?}");

    let err = ds
        .new_fim_section(NewFimSection::new("fp\0", ["/etc"]), None)
        .await
        .unwrap_err();
    assert!(matches!(err, DatastoreError::Validation(_)), "{err:?}");

    let err = ds
        .new_yara_signature_group(NewYaraSignatureGroup::new("sig1", ["/rules/\0"]), None)
        .await
        .unwrap_err();
    assert!(matches!(err, DatastoreError::Validation(_)), "{err:?}");

    empty_store(ds).await;
}

pub async fn repeated_association_is_idempotent(ds: &dyn Datastore) {
    ds.new_fim_section(fp1(), None).await.unwrap();
    ds.new_yara_signature_group(sig1(), None).await.unwrap();

    ds.new_yara_file_path("fp1", "sig1", None).await.unwrap();
    ds.new_yara_file_path("fp1", "sig1", None).await.unwrap();

    let yara = ds.yara_section().await.unwrap();
    assert_eq!(yara.file_paths["fp1"], vec!["sig1"]);
}

pub async fn groups_are_shared_across_sections(ds: &dyn Datastore) {
    ds.new_fim_section(fp1(), None).await.unwrap();
    ds.new_fim_section(NewFimSection::new("fp2", ["/var/www/%%"]), None)
        .await
        .unwrap();
    ds.new_yara_signature_group(sig1(), None).await.unwrap();
    ds.new_yara_signature_group(sig2(), None).await.unwrap();

    ds.new_yara_file_path("fp1", "sig1", None).await.unwrap();
    ds.new_yara_file_path("fp2", "sig1", None).await.unwrap();
    ds.new_yara_file_path("fp2", "sig2", None).await.unwrap();

    let yara = ds.yara_section().await.unwrap();
    assert_eq!(yara.file_paths["fp1"], vec!["sig1"]);
    assert_eq!(yara.file_paths["fp2"], vec!["sig1", "sig2"]);
    assert_eq!(yara.signatures["sig1"], vec!["path1", "path2"]);
    assert_eq!(yara.signatures["sig2"], vec!["path3"]);
}

pub async fn clearing_sections_drops_associations(ds: &dyn Datastore) {
    ds.new_fim_section(fp1(), None).await.unwrap();
    ds.new_yara_signature_group(sig1(), None).await.unwrap();
    ds.new_yara_file_path("fp1", "sig1", None).await.unwrap();

    ds.clear_fim_sections(None).await.unwrap();

    assert!(ds.fim_sections().await.unwrap().is_empty());
    let yara = ds.yara_section().await.unwrap();
    assert!(yara.file_paths.is_empty());
    assert_eq!(yara.signatures["sig1"], vec!["path1", "path2"]);

    // The name is free again.
    ds.new_fim_section(fp1(), None).await.unwrap();
}

pub async fn renders_agent_config(ds: &dyn Datastore) {
    ds.new_fim_section(fp1(), None).await.unwrap();
    ds.new_yara_signature_group(sig1(), None).await.unwrap();
    ds.new_yara_file_path("fp1", "sig1", None).await.unwrap();

    let config = fleet_datastore::render::fim_config(ds).await.unwrap();
    let json = serde_json::to_value(&config).unwrap();

    assert_eq!(json["file_paths"]["fp1"].as_array().unwrap().len(), 3);
    assert_eq!(json["yara"]["file_paths"]["fp1"][0], "sig1");
    assert_eq!(json["yara"]["signatures"]["sig1"].as_array().unwrap().len(), 2);
}

pub async fn snapshot_pairs_sections_with_yara(ds: &dyn Datastore) {
    ds.new_fim_section(fp1(), None).await.unwrap();
    ds.new_yara_signature_group(sig1(), None).await.unwrap();
    ds.new_yara_file_path("fp1", "sig1", None).await.unwrap();

    let (sections, yara) = ds.fim_snapshot().await.unwrap();
    assert_eq!(sections["fp1"], vec!["path1", "path2", "path3"]);
    assert_eq!(yara.file_paths["fp1"], vec!["sig1"]);

    ds.clear_fim_sections(None).await.unwrap();

    let (sections, yara) = ds.fim_snapshot().await.unwrap();
    assert!(sections.is_empty());
    assert!(yara.file_paths.is_empty());
    assert_eq!(yara.signatures["sig1"], vec!["path1", "path2"]);
}
