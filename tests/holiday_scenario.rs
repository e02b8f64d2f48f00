use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use holiday_planner::{Holiday, HolidayRepository, HolidayViewModel, MemoryStore, SqliteStore};
use tempfile::TempDir;

async fn wait_for_list<F>(vm: &HolidayViewModel, pred: F) -> Vec<Holiday>
where
    F: FnMut(&Vec<Holiday>) -> bool,
{
    let mut rx = vm.holidays();
    let list = tokio::time::timeout(Duration::from_secs(2), rx.wait_for(pred))
        .await
        .expect("timed out waiting for list")
        .expect("view model dropped")
        .clone();
    list
}

async fn run_paris_scenario(repo: HolidayRepository) {
    let vm = HolidayViewModel::new(repo.clone());

    // An older entry so ordering is meaningful
    vm.add_holiday(Holiday::new("Ski week").with_location("Alps"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let paris = Holiday::new("Paris Trip")
        .with_location("Paris")
        .with_dates("2024-06-01", "2024-06-10");
    let id = vm.add_holiday(paris).await.unwrap();

    // Newest first
    let list = wait_for_list(&vm, |l| l.len() == 2).await;
    assert_eq!(list[0].id, id);
    assert_eq!(list[0].title, "Paris Trip");

    // Matches on location, case-insensitively
    vm.set_query("par");
    let list = wait_for_list(&vm, |l| l.len() == 1).await;
    assert_eq!(list[0].id, id);

    vm.set_query("tokyo");
    wait_for_list(&vm, |l| l.is_empty()).await;

    let mut trips = repo.watch("trip");
    let first = trips.next().await.unwrap().unwrap();
    assert_eq!(first.len(), 1);

    let mut updated = first[0].clone();
    updated.title = "Paris Trip v2".to_string();
    vm.update_holiday(updated).await;
    assert!(vm.last_error().is_none());

    let renamed = tokio::time::timeout(Duration::from_secs(2), trips.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(renamed.len(), 1);
    assert_eq!(renamed[0].id, id);
    assert_eq!(renamed[0].title, "Paris Trip v2");

    // The "tokyo" query is still active and still empty
    assert!(vm.holidays().borrow().is_empty());
}

#[tokio::test]
async fn test_paris_scenario_in_memory() {
    let store = MemoryStore::new();
    run_paris_scenario(HolidayRepository::new(Arc::new(store))).await;
}

#[tokio::test]
async fn test_paris_scenario_sqlite() {
    let temp_dir = TempDir::new().unwrap();
    let store = SqliteStore::open(&temp_dir.path().join("holidays.db"))
        .await
        .unwrap();
    run_paris_scenario(HolidayRepository::new(Arc::new(store))).await;
}

#[tokio::test]
async fn test_created_record_reads_back_unchanged() {
    let repo = HolidayRepository::new(Arc::new(MemoryStore::new()));

    let holiday = Holiday::new("Lisbon")
        .with_location("Portugal")
        .with_notes("Pastéis de nata")
        .with_dates("next spring", "");
    let id = repo.create(&holiday).await.unwrap();

    let stored = repo.get_by_id(&id).await.unwrap().unwrap();
    assert!(stored.created_at.is_some());
    assert_eq!(stored.title, holiday.title);
    assert_eq!(stored.location, holiday.location);
    assert_eq!(stored.notes, holiday.notes);
    assert_eq!(stored.start_date, holiday.start_date);
    assert_eq!(stored.end_date, holiday.end_date);
}
