use std::sync::Arc;
use std::thread;

use quarry::buffer::BufferPoolManager;
use quarry::concurrency::{IsolationLevel, LockManager, TransactionManager, TransactionState};
use quarry::index::{BTreeIndex, IntegerComparator};
use quarry::storage::disk::DiskManager;
use quarry::storage::page::{TablePage, TablePageRef};
use quarry::{RecordId, SlotId};

fn main() {
    env_logger::init();

    println!("Quarry - disk-oriented storage & concurrency core");
    println!("==================================================\n");

    let db_path = "demo.db";

    let disk_manager = Arc::new(DiskManager::new(db_path).expect("Failed to create disk manager"));
    println!("Created disk manager for: {}", db_path);

    let bpm = Arc::new(BufferPoolManager::new(16, disk_manager));
    println!("Created buffer pool manager with 16 frames\n");

    // Store a few tuples in a table page
    let table_page_id;
    let mut rids = Vec::new();
    {
        let mut guard = bpm.new_page().expect("Failed to allocate page");
        table_page_id = guard.page_id();

        let mut page = TablePage::new(guard.data_mut());
        page.init(table_page_id);

        let tuples = [
            b"Hello, World!".as_slice(),
            b"This is Quarry",
            b"A storage core in Rust",
        ];

        for tuple in &tuples {
            let rid = page.insert_tuple(tuple).expect("Failed to insert tuple");
            println!("Inserted tuple at {}", rid);
            rids.push(rid);
        }

        println!("\nPage stats:");
        println!("  - Tuple count: {}", page.tuple_count());
        println!("  - Free space: {} bytes", page.free_space());
    }

    bpm.flush_page(table_page_id).expect("Failed to flush page");
    println!("\nFlushed page {} to disk", table_page_id);

    // Index the tuples by key
    let lock_manager = Arc::new(LockManager::new());
    let txn_manager = Arc::new(TransactionManager::new(Arc::clone(&lock_manager)));

    let index = BTreeIndex::new(
        "demo_pk",
        Arc::clone(&bpm),
        Arc::new(IntegerComparator),
        4,
        4,
    )
    .expect("Failed to open index");

    let txn = txn_manager.begin(IsolationLevel::RepeatableRead);
    for (i, rid) in rids.iter().enumerate() {
        let key = (i as u32 + 1) * 10;
        index.insert(key, *rid, &txn).expect("Failed to insert key");
        println!("Indexed key {} -> {}", key, rid);
    }

    println!("\nIndex scan:");
    for entry in index.begin().expect("Failed to open iterator") {
        let (key, rid) = entry.expect("Iterator failed");
        let guard = bpm
            .checked_read_page(rid.page_id)
            .expect("Failed to fetch tuple page");
        let page = TablePageRef::new(guard.data());
        let tuple = page.get_tuple(rid.slot_id).expect("Failed to read tuple");
        println!("  {} -> {}: {:?}", key, rid, String::from_utf8_lossy(tuple));
    }
    txn_manager.commit(&txn);

    // Hand a tuple lock from a reader to a writer
    println!("\nLock handoff:");
    let rid = RecordId::new(table_page_id, SlotId::new(0));

    let reader = txn_manager.begin(IsolationLevel::RepeatableRead);
    lock_manager
        .lock_shared(&reader, rid)
        .expect("Reader failed to lock");
    println!("  reader {} holds a shared lock on {}", reader.id(), rid);

    let writer_handle = {
        let lock_manager = Arc::clone(&lock_manager);
        let txn_manager = Arc::clone(&txn_manager);
        thread::spawn(move || {
            let writer = txn_manager.begin(IsolationLevel::RepeatableRead);
            lock_manager
                .lock_exclusive(&writer, rid)
                .expect("Writer failed to lock");
            println!("  writer {} acquired the exclusive lock", writer.id());
            txn_manager.commit(&writer);
        })
    };

    thread::sleep(std::time::Duration::from_millis(50));
    lock_manager.unlock(&reader, rid);
    println!(
        "  reader released its lock and is now {:?}",
        reader.state()
    );
    assert_eq!(reader.state(), TransactionState::Shrinking);
    writer_handle.join().expect("Writer thread failed");

    std::fs::remove_file(db_path).ok();
    println!("\nDemo completed successfully!");
}
