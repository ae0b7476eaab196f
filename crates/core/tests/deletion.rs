mod common;

use common::fixture;
use std::sync::Arc;
use tracker_core::{
    BundleStatus, Enrollment, ImportOptions, ImportStrategy, RuleId, TrackedEntity,
    TrackerBundleService, TrackerImportService, TrackerPayload, TrackerStatus, TrackerType,
};

fn delete_options() -> ImportOptions {
    ImportOptions::new().with_import_strategy(ImportStrategy::Delete)
}

fn tracked_entity_refs(uids: &[String]) -> Vec<TrackedEntity> {
    uids.iter()
        .map(|uid| TrackedEntity {
            uid: uid.clone(),
            ..Default::default()
        })
        .collect()
}

#[test]
fn test_delete_nine_of_thirteen_tracked_entities() {
    let f = fixture();
    let service = TrackerImportService::new(f.store.clone());

    let entities: Vec<TrackedEntity> = (0..13).map(|_| f.tracked_entity()).collect();
    let enrollment = f.enrollment(&entities[0].uid);
    let uids: Vec<String> = entities.iter().map(|te| te.uid.clone()).collect();

    let report = service.import(
        TrackerPayload::new()
            .with_tracked_entities(entities)
            .with_enrollments([enrollment]),
        ImportOptions::new(),
    );
    assert_eq!(report.status, TrackerStatus::Ok, "{:?}", report.errors);
    assert_eq!(report.stats(TrackerType::TrackedEntity).created, 13);
    assert_eq!(report.stats(TrackerType::Enrollment).created, 1);
    assert_eq!(f.store.tracked_entities().expect("list").len(), 13);

    let report = service.import(
        TrackerPayload::new().with_tracked_entities(tracked_entity_refs(&uids[..9])),
        delete_options(),
    );

    assert_eq!(report.status, TrackerStatus::Ok);
    assert_eq!(report.stats(TrackerType::TrackedEntity).deleted, 9);
    assert!(report.errors.is_empty());

    let remaining: Vec<String> = f
        .store
        .tracked_entities()
        .expect("list")
        .into_iter()
        .map(|te| te.uid)
        .collect();
    assert_eq!(remaining.len(), 4);
    for uid in &uids[9..] {
        assert!(remaining.contains(uid));
    }
    // the enrollment hung off a deleted tracked entity
    assert!(f.store.enrollments().expect("list").is_empty());
}

#[test]
fn test_repeated_delete_is_ignored() {
    let f = fixture();
    let service = TrackerImportService::new(f.store.clone());

    let entities: Vec<TrackedEntity> = (0..3).map(|_| f.tracked_entity()).collect();
    let uids: Vec<String> = entities.iter().map(|te| te.uid.clone()).collect();
    service.import(
        TrackerPayload::new().with_tracked_entities(entities),
        ImportOptions::new(),
    );

    let first = service.import(
        TrackerPayload::new().with_tracked_entities(tracked_entity_refs(&uids)),
        delete_options(),
    );
    assert_eq!(first.stats(TrackerType::TrackedEntity).deleted, 3);

    let second = service.import(
        TrackerPayload::new().with_tracked_entities(tracked_entity_refs(&uids)),
        delete_options(),
    );
    assert_eq!(second.status, TrackerStatus::Ok);
    assert_eq!(second.stats(TrackerType::TrackedEntity).deleted, 0);
    assert_eq!(second.stats(TrackerType::TrackedEntity).ignored, 3);
    assert!(second.errors.is_empty());
    assert!(second.failures.is_empty());
}

#[test]
fn test_delete_enrollment_through_bundle_service() {
    let f = fixture();
    let te = f.tracked_entity();
    let enrollment = f.enrollment(&te.uid);
    let event = f.event(&enrollment.uid);
    let enrollment_uid = enrollment.uid.clone();

    let importer = TrackerImportService::new(f.store.clone());
    let report = importer.import(
        TrackerPayload::new()
            .with_tracked_entities([te])
            .with_enrollments([enrollment])
            .with_events([event]),
        ImportOptions::new(),
    );
    assert_eq!(report.status, TrackerStatus::Ok, "{:?}", report.errors);

    let service = TrackerBundleService::new(f.store.clone());
    let mut bundles = service.create(
        TrackerPayload::new().with_enrollments([Enrollment {
            uid: enrollment_uid,
            ..Default::default()
        }]),
        Arc::new(delete_options()),
    );
    assert_eq!(bundles.len(), 1);

    let report = service
        .delete(bundles.remove(0))
        .expect("delete should succeed");

    assert_eq!(report.status, BundleStatus::Deleted);
    assert_eq!(report.stats(TrackerType::Enrollment).deleted, 1);
    assert_eq!(f.store.tracked_entities().expect("list").len(), 1);
    assert!(f.store.enrollments().expect("list").is_empty());
    assert!(f.store.events().expect("list").is_empty());
}

#[test]
fn test_delete_hierarchy_in_one_bundle() {
    let f = fixture();
    let te = f.tracked_entity();
    let enrollment = f.enrollment(&te.uid);
    let event = f.event(&enrollment.uid);
    let payload = TrackerPayload::new()
        .with_tracked_entities([te])
        .with_enrollments([enrollment])
        .with_events([event]);

    let service = TrackerImportService::new(f.store.clone());
    service.import(payload.clone(), ImportOptions::new());

    let report = service.import(payload, delete_options());

    assert_eq!(report.status, TrackerStatus::Ok);
    for tracker_type in [
        TrackerType::TrackedEntity,
        TrackerType::Enrollment,
        TrackerType::Event,
    ] {
        assert_eq!(report.stats(tracker_type).deleted, 1, "{tracker_type}");
    }
}

#[test]
fn test_repeated_hierarchy_delete_is_ignored() {
    let f = fixture();
    let te = f.tracked_entity();
    let enrollment = f.enrollment(&te.uid);
    let event = f.event(&enrollment.uid);
    let payload = TrackerPayload::new()
        .with_tracked_entities([te])
        .with_enrollments([enrollment])
        .with_events([event]);

    let service = TrackerImportService::new(f.store.clone());
    service.import(payload.clone(), ImportOptions::new());
    let first = service.import(payload.clone(), delete_options());
    assert_eq!(first.status, TrackerStatus::Ok);

    // the enrollment and event were already removed with their tracked entity
    let second = service.import(payload, delete_options());

    assert_eq!(second.status, TrackerStatus::Ok);
    assert!(second.errors.is_empty());
    assert!(second.failures.is_empty());
    for tracker_type in TrackerType::DELETE_ORDER {
        let stats = second.stats(tracker_type);
        assert_eq!(stats.ignored, 1, "{tracker_type}");
        assert_eq!(stats.deleted, 0, "{tracker_type}");
    }
}

#[test]
fn test_delete_payload_is_validated_before_removal() {
    let f = fixture();
    let service = TrackerImportService::new(f.store.clone());
    let te = f.tracked_entity();
    let uid = te.uid.clone();
    service.import(
        TrackerPayload::new().with_tracked_entities([te]),
        ImportOptions::new(),
    );

    let report = service.import(
        TrackerPayload::new().with_tracked_entities(tracked_entity_refs(&[
            "not-a-uid".to_string(),
            String::new(),
            uid.clone(),
            uid.clone(),
        ])),
        delete_options(),
    );

    assert_eq!(report.status, TrackerStatus::Error);
    assert_eq!(report.bundles[0].status, BundleStatus::Rejected);
    let rules: Vec<RuleId> = report.errors.iter().map(|e| e.rule).collect();
    assert!(rules.contains(&RuleId::UidFormat));
    assert!(rules.contains(&RuleId::RequiredFields));
    assert_eq!(
        rules
            .iter()
            .filter(|rule| **rule == RuleId::DuplicateReference)
            .count(),
        2
    );
    assert_eq!(report.stats(TrackerType::TrackedEntity).ignored, 4);
    assert_eq!(report.stats(TrackerType::TrackedEntity).deleted, 0);
    assert_eq!(f.store.tracked_entities().expect("list").len(), 1);
}

#[test]
fn test_delete_holds_back_invalid_references_and_removes_the_rest() {
    let f = fixture();
    let service = TrackerImportService::new(f.store.clone());
    let entities: Vec<TrackedEntity> = (0..2).map(|_| f.tracked_entity()).collect();
    let uids: Vec<String> = entities.iter().map(|te| te.uid.clone()).collect();
    service.import(
        TrackerPayload::new().with_tracked_entities(entities),
        ImportOptions::new(),
    );

    let report = service.import(
        TrackerPayload::new().with_tracked_entities(tracked_entity_refs(&[
            uids[0].clone(),
            "not-a-uid".to_string(),
        ])),
        delete_options(),
    );

    assert_eq!(report.status, TrackerStatus::Error);
    assert_eq!(report.bundles[0].status, BundleStatus::Deleted);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].rule, RuleId::UidFormat);
    assert_eq!(report.stats(TrackerType::TrackedEntity).deleted, 1);
    assert_eq!(report.stats(TrackerType::TrackedEntity).ignored, 1);

    let remaining: Vec<String> = f
        .store
        .tracked_entities()
        .expect("list")
        .into_iter()
        .map(|te| te.uid)
        .collect();
    assert_eq!(remaining, vec![uids[1].clone()]);
}

#[test]
fn test_deleted_record_cannot_be_imported_again() {
    let f = fixture();
    let te = f.tracked_entity();
    let service = TrackerImportService::new(f.store.clone());
    service.import(
        TrackerPayload::new().with_tracked_entities([te.clone()]),
        ImportOptions::new(),
    );
    service.import(
        TrackerPayload::new().with_tracked_entities(tracked_entity_refs(&[te.uid.clone()])),
        delete_options(),
    );

    let report = service.import(
        TrackerPayload::new().with_tracked_entities([te]),
        ImportOptions::new(),
    );

    assert_eq!(report.status, TrackerStatus::Error);
    assert_eq!(report.stats(TrackerType::TrackedEntity).ignored, 1);
    assert!(report.errors[0].message.contains("has been deleted"));
}
