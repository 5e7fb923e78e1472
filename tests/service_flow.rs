//! End-to-end scenarios through the public service facade.

use civicwatch::{
    Config, CoreError, DeviceAttributes, GeoPoint, NewReport, OfflineBuffer, ReportService,
    ReportStatus,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

fn service() -> ReportService {
    ReportService::open_in_memory(Config::default()).unwrap()
}

fn payload(fp: &str, lat: f64, lng: f64) -> NewReport {
    NewReport {
        category: "Public Disturbance".into(),
        description: "Loud altercation near the market entrance".into(),
        location: GeoPoint { lat, lng },
        photo_url: None,
        fingerprint: fp.into(),
        idempotency_token: None,
    }
}

/// Drive a fingerprint's score down to 35 using only public operations:
/// one submission flagged as fake costs 15 points.
fn sink_to_low_trust(service: &ReportService, fp: &str) {
    let receipt = service
        .submit_report(&payload(fp, -1.90, 30.00))
        .unwrap();
    service.mark_report_fake(&receipt.report_id).unwrap();
    assert_eq!(service.get_trust_info(fp).unwrap().trust_score, 35);
}

#[test]
fn low_trust_submission_is_held_then_released_by_verification() {
    let service = service();
    let fp = civicwatch::fingerprint::derive(&DeviceAttributes {
        screen_width: Some(720),
        screen_height: Some(1600),
        timezone_offset: Some(-120),
        language: Some("rw-RW".into()),
        platform: Some("Android".into()),
        logical_cores: Some(4),
        device_memory_gb: Some(2),
    });
    sink_to_low_trust(&service, &fp);

    let receipt = service
        .submit_report(&payload(&fp, -1.9441, 30.0619))
        .unwrap();
    assert!(receipt.queued);
    assert!(receipt.notice.is_some());

    let queue = service.get_low_trust_queue().unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].reference_number, receipt.reference_number);
    assert_eq!(queue[0].trust_score_at_submission, 35);

    let before = service.get_trust_info(&fp).unwrap().trust_score;
    let verified = service.verify_report(&receipt.report_id).unwrap();
    assert!(verified.verified_by_operator);
    assert!(!verified.queued);
    assert!(service.get_low_trust_queue().unwrap().is_empty());
    assert!(service.get_trust_info(&fp).unwrap().trust_score > before);
}

#[test]
fn high_trust_dense_reports_form_a_hotspot() {
    let service = service();

    // Three well-behaved devices reporting ~1 m apart
    for (i, fp) in ["aaaa0001", "aaaa0002", "aaaa0003"].iter().enumerate() {
        let receipt = service
            .submit_report(&payload(fp, -1.9441, 30.0619 + i as f64 * 0.00001))
            .unwrap();
        assert!(!receipt.queued);
    }
    // One flagged-fake report and one held report in the same spot must
    // not inflate the hotspot
    let fake = service
        .submit_report(&payload("bbbb0001", -1.9441, 30.0619))
        .unwrap();
    service.mark_report_fake(&fake.report_id).unwrap();
    sink_to_low_trust(&service, "cccc0001");
    let held = service
        .submit_report(&payload("cccc0001", -1.9441, 30.0619))
        .unwrap();
    assert!(held.queued);

    assert!(service.get_clusters().clusters.is_empty());
    let set = service.refresh_clusters(None).unwrap();
    assert_eq!(set.clusters.len(), 1);
    assert_eq!(set.clusters[0].member_count, 3);
    assert_eq!(set.generated_at, service.get_clusters().generated_at);

    // Two refreshes over unchanged data agree exactly
    let again = service.refresh_clusters(None).unwrap();
    assert_eq!(set.clusters, again.clusters);
}

#[test]
fn refresh_rejects_bad_parameters_without_clobbering_the_snapshot() {
    let service = service();
    for i in 0..3 {
        service
            .submit_report(&payload(&format!("dddd000{i}"), 0.0, i as f64 * 0.00001))
            .unwrap();
    }
    let good = service.refresh_clusters(None).unwrap();

    let err = service.refresh_clusters(Some(civicwatch::DbscanParams {
        epsilon_meters: -10.0,
        min_samples: 3,
    }));
    assert!(matches!(err, Err(CoreError::Configuration(_))));
    assert_eq!(service.get_clusters().clusters, good.clusters);
}

#[test]
fn offline_queue_replays_through_the_gate_without_duplicates() {
    let service = service();
    let dir = tempfile::tempdir().unwrap();
    let buffer = OfflineBuffer::open(&dir.path().join("pending.db")).unwrap();

    for i in 0..3 {
        let mut p = payload("eeee0001", -1.95, 30.06);
        p.description = format!("offline incident {i}");
        buffer.enqueue(p).unwrap();
    }

    // First sync dies after the server applies the first entry
    let first = buffer.pending().unwrap().remove(0);
    service.submit_report(&first.payload).unwrap();

    // Retried sync collapses the duplicate and drains the queue
    let outcome = buffer.replay(service.intake_gate()).unwrap();
    assert_eq!(outcome.synced, 3);
    assert_eq!(outcome.remaining, 0);
    assert_eq!(
        service.list_reports(&Default::default()).unwrap().len(),
        3
    );
    assert_eq!(service.get_trust_info("eeee0001").unwrap().report_count, 3);
}

#[test]
fn reference_numbers_unique_across_ten_thousand_concurrent_submissions() {
    let service = Arc::new(service());
    let seen = Arc::new(Mutex::new(HashSet::new()));

    let mut handles = Vec::new();
    for t in 0..8 {
        let service = Arc::clone(&service);
        let seen = Arc::clone(&seen);
        handles.push(std::thread::spawn(move || {
            for i in 0..1250 {
                let receipt = service
                    .submit_report(&payload(
                        &format!("f{t:02}{i:04}"),
                        (t as f64) * 0.5,
                        (i as f64) * 0.001,
                    ))
                    .unwrap();
                assert!(seen.lock().unwrap().insert(receipt.reference_number));
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(seen.lock().unwrap().len(), 10_000);
}

#[test]
fn trust_info_is_masked_and_cleanup_reports_counts() {
    let service = service();
    service
        .submit_report(&payload("abcdef0123456789", -1.95, 30.06))
        .unwrap();

    let info = service.get_trust_info("abcdef01").unwrap();
    assert_eq!(info.fingerprint_masked, "abcdef01...");
    assert_eq!(info.report_count, 1);

    assert!(matches!(
        service.get_trust_info("zz"),
        Err(CoreError::Validation(_))
    ));

    // Nothing is stale yet
    let outcome = service.cleanup_old_trust_data(None).unwrap();
    assert_eq!(outcome.deleted_count, 0);
    assert!(matches!(
        service.cleanup_old_trust_data(Some(0)),
        Err(CoreError::Configuration(_))
    ));
}

#[test]
fn lifecycle_status_updates_flow_through_the_facade() {
    let service = service();
    let receipt = service
        .submit_report(&payload("ffff0001", -1.95, 30.06))
        .unwrap();

    let report = service
        .update_report_status(&receipt.report_id, ReportStatus::Investigating)
        .unwrap();
    assert_eq!(report.status, ReportStatus::Investigating);

    let report = service
        .update_report_status(&receipt.report_id, ReportStatus::Resolved)
        .unwrap();
    assert_eq!(report.status, ReportStatus::Resolved);
    assert_eq!(service.get_trust_info("ffff0001").unwrap().trust_score, 53);

    let analytics = service.abuse_analytics().unwrap();
    assert_eq!(analytics.total_fingerprints, 1);
}
