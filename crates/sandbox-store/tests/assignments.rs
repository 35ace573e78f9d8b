//! Assignment behaviour through the client, on both the service and the
//! direct metadata path.

use std::sync::Arc;

use sandbox_store::{
    DirectAccess, DirectAccessStatus, EntityId, LocationDescriptor, MetadataDb,
    ObjectStoreSandboxService, Owner, SandboxAssignment, SandboxStoreClient, SandboxStoreConfig,
    SandboxType, StoreError,
};

fn sandbox(pfn: &str, sb_type: SandboxType) -> SandboxAssignment {
    SandboxAssignment::new(LocationDescriptor::new("SandboxSE", pfn).unwrap(), sb_type)
}

#[tokio::test]
async fn test_invalid_type_leaves_no_record() {
    let service = Arc::new(ObjectStoreSandboxService::memory("SandboxSE").unwrap());
    let client = SandboxStoreClient::from_service(&SandboxStoreConfig::default(), service.clone());

    let err = client
        .assign_sandboxes_to_job(
            11,
            &[("SB:SandboxSE|/a.tar.bz2", "Input"), ("SB:SandboxSE|/b.tar.bz2", "Whatever")],
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidSandboxType { .. }));
    assert!(err.is_validation());

    let err = client
        .sandboxes_assigned_to_entity(&EntityId::job(11))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::EntityNotFound { .. }));
    assert_eq!(service.metadata().entity_count(), 0);
}

#[tokio::test]
async fn test_bad_descriptor_rejected_before_assignment() {
    let service = Arc::new(ObjectStoreSandboxService::memory("SandboxSE").unwrap());
    let client = SandboxStoreClient::from_service(&SandboxStoreConfig::default(), service.clone());

    let err = client
        .assign_sandboxes_to_job(12, &[("SBSEName|path", "Input")], None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidLocationFormat { .. }));
    assert_eq!(service.metadata().entity_count(), 0);
}

#[tokio::test]
async fn test_unassign_unknown_and_repeated() {
    let service = Arc::new(ObjectStoreSandboxService::memory("SandboxSE").unwrap());
    let client = SandboxStoreClient::from_service(&SandboxStoreConfig::default(), service);

    client.unassign_entities(EntityId::job(1000)).await.unwrap();

    let job = EntityId::job(1);
    client
        .assign_sandboxes_to_entity(&job, &[sandbox("/x", SandboxType::Input)], None)
        .await
        .unwrap();
    client.unassign_jobs(&[1]).await.unwrap();
    client.unassign_jobs(&[1]).await.unwrap();

    let err = client.sandboxes_assigned_to_entity(&job).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_many_to_many_assignment() {
    let service = Arc::new(ObjectStoreSandboxService::memory("SandboxSE").unwrap());
    let client = SandboxStoreClient::from_service(&SandboxStoreConfig::default(), service);

    let shared = sandbox("/shared", SandboxType::Input);
    let job = EntityId::job(1);
    let pilot = EntityId::pilot("p");
    client
        .assign_sandboxes_to_entity(
            &job,
            &[shared.clone(), sandbox("/out", SandboxType::Output)],
            None,
        )
        .await
        .unwrap();
    client
        .assign_sandboxes_to_entity(&pilot, &[shared.clone()], None)
        .await
        .unwrap();

    client.unassign_entities(job.clone()).await.unwrap();

    let by_type = client.sandboxes_assigned_to_entity(&pilot).await.unwrap();
    assert_eq!(by_type[&SandboxType::Input], vec![shared.location]);
}

#[tokio::test]
async fn test_direct_access_shares_records_with_service() {
    let db = Arc::new(MetadataDb::in_memory());
    let service = Arc::new(
        ObjectStoreSandboxService::memory_with_metadata("SandboxSE", db.clone()).unwrap(),
    );
    let client = SandboxStoreClient::with_direct_access(
        &SandboxStoreConfig::default(),
        service.clone(),
        service,
        DirectAccess::Shared(db.clone()),
    );
    assert_eq!(client.direct_access_status(), DirectAccessStatus::Active);

    let job = EntityId::job(21);
    client
        .assign_sandboxes_to_entity(
            &job,
            &[sandbox("/local", SandboxType::Output)],
            Some(&Owner::new("alice", "dirac_user")),
        )
        .await
        .unwrap();

    let by_type = client.sandboxes_assigned_to_entity(&job).await.unwrap();
    assert_eq!(by_type[&SandboxType::Output].len(), 1);
    assert_eq!(db.entity_count(), 1);
}

#[tokio::test]
async fn test_direct_access_from_config_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "").unwrap();

    let mut config = SandboxStoreConfig::default();
    config.metadata_db = Some(format!("file://{}", blocker.join("db.json").display()));

    let service = Arc::new(ObjectStoreSandboxService::memory("SandboxSE").unwrap());
    let client = SandboxStoreClient::from_service(&config, service.clone());
    assert!(matches!(
        client.direct_access_status(),
        DirectAccessStatus::FellBack { .. }
    ));

    let job = EntityId::job(22);
    client
        .assign_sandboxes_to_entity(
            &job,
            &[sandbox("/remote", SandboxType::Input)],
            Some(&Owner::new("alice", "dirac_user")),
        )
        .await
        .unwrap();
    assert_eq!(service.metadata().entity_count(), 1);
}

#[tokio::test]
async fn test_file_metadata_persists_across_clients() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("file://{}", dir.path().join("meta.json").display());
    let job = EntityId::job(30);

    {
        let db = Arc::new(MetadataDb::open(&url).unwrap());
        let service =
            Arc::new(ObjectStoreSandboxService::memory_with_metadata("SandboxSE", db).unwrap());
        let client = SandboxStoreClient::from_service(&SandboxStoreConfig::default(), service);
        client
            .assign_sandboxes_to_entity(&job, &[sandbox("/kept", SandboxType::Input)], None)
            .await
            .unwrap();
    }

    let db = MetadataDb::open(&url).unwrap();
    let records = db.assignments_for(&job).unwrap();
    assert_eq!(records, vec![sandbox("/kept", SandboxType::Input)]);
}

#[tokio::test]
async fn test_connect_shares_metadata_db_between_paths() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = SandboxStoreConfig::default()
        .with_store_url(format!("file://{}", dir.path().join("store").display()));
    config.metadata_db = Some(format!("file://{}", dir.path().join("meta.json").display()));

    let client = SandboxStoreClient::connect(&config).await.unwrap();
    assert_eq!(client.direct_access_status(), DirectAccessStatus::Active);

    // Written on the direct path, read back through the service
    let job = EntityId::job(40);
    client
        .assign_sandboxes_to_entity(
            &job,
            &[sandbox("/direct", SandboxType::Output)],
            Some(&Owner::new("alice", "dirac_user")),
        )
        .await
        .unwrap();
    let by_type = client.sandboxes_assigned_to_entity(&job).await.unwrap();
    assert_eq!(
        by_type[&SandboxType::Output],
        vec![sandbox("/direct", SandboxType::Output).location]
    );

    // Written through the service, visible in the same file
    let other = EntityId::job(41);
    client
        .assign_sandboxes_to_entity(&other, &[sandbox("/service", SandboxType::Input)], None)
        .await
        .unwrap();
    let db = MetadataDb::open(config.metadata_db.as_deref().unwrap()).unwrap();
    assert_eq!(db.entity_count(), 2);
}

#[tokio::test]
async fn test_connect_with_unusable_metadata_db_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "").unwrap();

    let mut config = SandboxStoreConfig::default();
    config.metadata_db = Some(format!("file://{}", blocker.join("db.json").display()));

    let client = SandboxStoreClient::connect(&config).await.unwrap();
    assert!(matches!(
        client.direct_access_status(),
        DirectAccessStatus::FellBack { .. }
    ));

    let job = EntityId::job(42);
    client
        .assign_sandboxes_to_entity(
            &job,
            &[sandbox("/fallback", SandboxType::Input)],
            Some(&Owner::new("alice", "dirac_user")),
        )
        .await
        .unwrap();
    let by_type = client.sandboxes_assigned_to_entity(&job).await.unwrap();
    assert_eq!(by_type[&SandboxType::Input].len(), 1);
}

#[tokio::test]
async fn test_connect_rejects_invalid_backend() {
    let config = SandboxStoreConfig::default().with_backend_id("a|b");
    let err = SandboxStoreClient::connect(&config).await.err().unwrap();
    assert!(matches!(err, StoreError::Config { .. }));
    assert_eq!(err.exit_code(), 4);
}
