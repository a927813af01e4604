//! File-per-notification store.

use std::fs::File;
use std::time::{Duration as StdDuration, SystemTime};

use chrono::{Duration, Utc};

use rushd::models::notification::{Notification, NotificationFilter, NotificationStatus};
use rushd::persistence::notification_repo::NotificationRepo;
use rushd::persistence::retention;

fn notification(worker_id: &str, worker_name: &str, age_secs: i64) -> Notification {
    let mut n = Notification::new(
        worker_id.to_owned(),
        worker_name.to_owned(),
        NotificationStatus::Success,
        format!("{worker_name} finished"),
    );
    n.created_at = Utc::now() - Duration::seconds(age_secs);
    n
}

#[test]
fn filenames_are_sanitized_and_timestamped() {
    let mut n = notification("ab12cd34", "api worker/1", 0);
    n.created_at = chrono::DateTime::parse_from_rfc3339("2025-03-04T05:06:07.089Z")
        .unwrap()
        .with_timezone(&Utc);

    assert_eq!(
        NotificationRepo::file_name(&n),
        "api_worker_1_ab12cd34_20250304_050607_089000.json"
    );
}

#[test]
fn empty_worker_name_uses_placeholder() {
    let n = notification("ab12cd34", "", 0);
    assert!(NotificationRepo::file_name(&n).starts_with("unknown_ab12cd34_"));
}

#[test]
fn same_worker_different_times_get_distinct_files() {
    let dir = tempfile::tempdir().unwrap();
    let repo = NotificationRepo::new(dir.path().join("notifications"));
    let first = notification("ab12cd34", "alpha", 2);
    let second = notification("ab12cd34", "alpha", 1);

    let first_path = repo.save(&first).unwrap();
    let second_path = repo.save(&second).unwrap();

    assert_ne!(first_path, second_path);
    assert_eq!(
        repo.list(&NotificationFilter::default(), 10).unwrap().len(),
        2
    );
}

#[test]
fn sub_millisecond_timestamps_get_distinct_files() {
    let dir = tempfile::tempdir().unwrap();
    let repo = NotificationRepo::new(dir.path());
    let base = chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc);
    let mut first = notification("ab12cd34", "alpha", 0);
    first.created_at = base;
    let mut second = notification("ab12cd34", "alpha", 0);
    second.created_at = base + Duration::microseconds(300);

    let first_path = repo.save(&first).unwrap();
    let second_path = repo.save(&second).unwrap();

    assert_ne!(first_path, second_path);
    assert_eq!(
        repo.list(&NotificationFilter::default(), 10).unwrap().len(),
        2
    );
}

#[test]
fn save_never_overwrites_an_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let repo = NotificationRepo::new(dir.path());
    let first = notification("ab12cd34", "alpha", 0);
    let mut twin = notification("ab12cd34", "alpha", 0);
    twin.created_at = first.created_at;

    let path = repo.save(&first).unwrap();
    let err = repo.save(&twin).expect_err("same filename must not clobber");

    assert!(matches!(err, rushd::AppError::Persistence(_)), "got {err}");
    let listed = repo.list(&NotificationFilter::default(), 10).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, first.id);
    assert!(path.exists());
}

#[test]
fn mark_delivered_only_touches_its_file() {
    let dir = tempfile::tempdir().unwrap();
    let repo = NotificationRepo::new(dir.path());
    let first = notification("ab12cd34", "alpha", 2);
    let second = notification("ab12cd34", "alpha", 1);
    let first_path = repo.save(&first).unwrap();
    repo.save(&second).unwrap();

    assert!(repo.mark_delivered(&first_path).unwrap());

    let (_, stored_first) = repo.get_by_id(&first.id).unwrap().unwrap();
    let (_, stored_second) = repo.get_by_id(&second.id).unwrap().unwrap();
    assert!(stored_first.delivered);
    assert!(stored_first.delivered_at.is_some());
    assert!(!stored_second.delivered);
    assert!(stored_second.delivered_at.is_none());
}

#[test]
fn mark_delivered_on_missing_or_corrupt_file_is_false() {
    let dir = tempfile::tempdir().unwrap();
    let repo = NotificationRepo::new(dir.path());
    assert!(!repo.mark_delivered(&dir.path().join("absent.json")).unwrap());

    let corrupt = dir.path().join("corrupt.json");
    std::fs::write(&corrupt, "not json").unwrap();
    assert!(!repo.mark_delivered(&corrupt).unwrap());
    assert!(!repo.mark_delivered_by_id("no-such-id").unwrap());
}

#[test]
fn list_is_newest_first_filtered_and_limited() {
    let dir = tempfile::tempdir().unwrap();
    let repo = NotificationRepo::new(dir.path());
    let oldest = notification("aaaa0001", "alpha", 30);
    let middle = notification("bbbb0002", "beta", 20);
    let newest = notification("aaaa0001", "alpha", 10);
    for n in [&middle, &newest, &oldest] {
        repo.save(n).unwrap();
    }
    assert!(repo.mark_delivered_by_id(&newest.id).unwrap());

    let all: Vec<_> = repo
        .list(&NotificationFilter::default(), 10)
        .unwrap()
        .into_iter()
        .map(|n| n.id)
        .collect();
    assert_eq!(all, [newest.id.clone(), middle.id.clone(), oldest.id.clone()]);

    let limited = repo.list(&NotificationFilter::default(), 1).unwrap();
    assert_eq!(limited[0].id, newest.id);

    let alpha_pending = repo
        .list(
            &NotificationFilter {
                worker_id: Some("aaaa0001".into()),
                undelivered_only: true,
            },
            10,
        )
        .unwrap();
    assert_eq!(alpha_pending.len(), 1);
    assert_eq!(alpha_pending[0].id, oldest.id);
}

#[test]
fn unparseable_files_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let repo = NotificationRepo::new(dir.path());
    repo.save(&notification("aaaa0001", "alpha", 0)).unwrap();
    std::fs::write(dir.path().join("garbage.json"), "{").unwrap();

    assert_eq!(repo.list(&NotificationFilter::default(), 10).unwrap().len(), 1);
}

#[test]
fn cleanup_removes_files_older_than_cutoff() {
    let dir = tempfile::tempdir().unwrap();
    let repo = NotificationRepo::new(dir.path());
    let stale_path = repo.save(&notification("aaaa0001", "alpha", 0)).unwrap();
    let fresh = notification("bbbb0002", "beta", 0);
    repo.save(&fresh).unwrap();

    let ten_days_ago = SystemTime::now() - StdDuration::from_secs(10 * 24 * 3600);
    File::options()
        .write(true)
        .open(&stale_path)
        .unwrap()
        .set_modified(ten_days_ago)
        .unwrap();

    let removed = retention::purge(&repo, 7).unwrap();

    assert_eq!(removed, 1);
    assert!(!stale_path.exists());
    let left = repo.list(&NotificationFilter::default(), 10).unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].id, fresh.id);
}

#[test]
fn cleanup_on_missing_directory_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let repo = NotificationRepo::new(dir.path().join("never-created"));
    assert_eq!(repo.cleanup_older_than(Utc::now()).unwrap(), 0);
}
