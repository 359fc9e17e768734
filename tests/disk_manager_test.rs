//! Integration tests for the disk manager and scheduler

use std::sync::Arc;

use quarry::common::{HEADER_PAGE_ID, PAGE_SIZE};
use quarry::storage::disk::{DiskManager, DiskScheduler};
use quarry::PageId;
use tempfile::NamedTempFile;

#[test]
fn test_disk_manager_reserves_header_page() {
    let temp_file = NamedTempFile::new().unwrap();
    let dm = DiskManager::new(temp_file.path()).unwrap();

    assert_eq!(dm.get_num_pages(), 1);
    assert_eq!(dm.allocate_page().unwrap(), PageId::new(1));

    let mut data = [0xFFu8; PAGE_SIZE];
    dm.read_page(HEADER_PAGE_ID, &mut data).unwrap();
    assert!(data.iter().all(|&b| b == 0));
}

#[test]
fn test_disk_manager_write_read_cycle() {
    let temp_file = NamedTempFile::new().unwrap();
    let dm = DiskManager::new(temp_file.path()).unwrap();

    let page_id = dm.allocate_page().unwrap();

    let mut data = [0u8; PAGE_SIZE];
    for (i, byte) in data.iter_mut().enumerate() {
        *byte = (i % 251) as u8;
    }
    dm.write_page(page_id, &data).unwrap();

    let mut read_back = [0u8; PAGE_SIZE];
    dm.read_page(page_id, &mut read_back).unwrap();
    assert_eq!(data, read_back);

    assert!(dm.get_num_writes() >= 1);
    assert!(dm.get_num_reads() >= 1);
}

#[test]
fn test_disk_manager_read_past_end_zero_fills() {
    let temp_file = NamedTempFile::new().unwrap();
    let dm = DiskManager::new(temp_file.path()).unwrap();

    let mut data = [0xAAu8; PAGE_SIZE];
    dm.read_page(PageId::new(40), &mut data).unwrap();
    assert!(data.iter().all(|&b| b == 0));
}

#[test]
fn test_disk_manager_reopen_keeps_pages() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();

    let page_id;
    {
        let dm = DiskManager::new(&path).unwrap();
        page_id = dm.allocate_page().unwrap();
        let data = [7u8; PAGE_SIZE];
        dm.write_page(page_id, &data).unwrap();
        dm.sync().unwrap();
    }

    {
        let dm = DiskManager::new(&path).unwrap();
        assert_eq!(dm.get_num_pages(), 2);

        let mut data = [0u8; PAGE_SIZE];
        dm.read_page(page_id, &mut data).unwrap();
        assert!(data.iter().all(|&b| b == 7));
    }
}

#[test]
fn test_disk_scheduler_round_trip() {
    let temp_file = NamedTempFile::new().unwrap();
    let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
    let scheduler = DiskScheduler::new(Arc::clone(&dm));

    let page_id = dm.allocate_page().unwrap();

    let mut data = [0u8; PAGE_SIZE];
    data[0] = 11;
    data[PAGE_SIZE - 1] = 22;
    scheduler.schedule_write_sync(page_id, &data).unwrap();

    let mut read_back = [0u8; PAGE_SIZE];
    scheduler
        .schedule_read_sync(page_id, &mut read_back)
        .unwrap();
    assert_eq!(read_back[0], 11);
    assert_eq!(read_back[PAGE_SIZE - 1], 22);
}
