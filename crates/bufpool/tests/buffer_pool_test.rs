use bufpool::{BufferPoolManager, FileHandle, PageId, PAGE_SIZE};
use tempfile::TempDir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn fill_page(pool: &BufferPoolManager, file: &FileHandle, page_no: PageId, byte: u8) {
    {
        let mut guard = pool.read_page(file, page_no).expect("read for write");
        guard.data_mut().fill(byte);
    }
    pool.unpin_page(file, page_no, true).expect("unpin dirty");
}

fn first_byte(pool: &BufferPoolManager, file: &FileHandle, page_no: PageId) -> u8 {
    let byte = {
        let guard = pool.read_page(file, page_no).expect("read");
        guard.data()[0]
    };
    pool.unpin_page(file, page_no, false).expect("unpin");
    byte
}

#[test]
fn dirty_pages_persist_through_flush() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let file = FileHandle::open(dir.path().join("data.db")).unwrap();
    let pool = BufferPoolManager::new(4);

    let (page_no, guard) = pool.alloc_page(&file).expect("alloc");
    drop(guard);
    pool.unpin_page(&file, page_no, false).unwrap();

    fill_page(&pool, &file, page_no, 0x5A);
    pool.flush_file(&file).expect("flush");

    // the flush vacated the frame, so this read comes back from disk
    assert_eq!(first_byte(&pool, &file, page_no), 0x5A);
}

#[test]
fn teardown_writes_dirty_pages_to_disk() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("data.db");

    let page_no = {
        let file = FileHandle::open(&path).unwrap();
        let pool = BufferPoolManager::new(2);
        let (page_no, guard) = pool.alloc_page(&file).expect("alloc");
        drop(guard);
        pool.unpin_page(&file, page_no, false).unwrap();
        fill_page(&pool, &file, page_no, 0xC3);
        page_no
    }; // pool drops here and must flush

    let file = FileHandle::open(&path).unwrap();
    let pool = BufferPoolManager::new(2);
    assert_eq!(first_byte(&pool, &file, page_no), 0xC3);
}

#[test]
fn eviction_write_back_round_trips_through_a_tiny_pool() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let file = FileHandle::open(dir.path().join("data.db")).unwrap();
    let pool = BufferPoolManager::new(1);

    let mut page_nos = Vec::new();
    for byte in 1..=8u8 {
        let (page_no, guard) = pool.alloc_page(&file).expect("alloc");
        drop(guard);
        pool.unpin_page(&file, page_no, false).unwrap();
        fill_page(&pool, &file, page_no, byte);
        page_nos.push(page_no);
    }

    // every page except the resident one was evicted through the one frame
    for (index, page_no) in page_nos.iter().enumerate() {
        assert_eq!(first_byte(&pool, &file, *page_no), index as u8 + 1);
    }
}

#[test]
fn files_are_isolated_in_the_pool_and_on_disk() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let file_a = FileHandle::open(dir.path().join("a.db")).unwrap();
    let file_b = FileHandle::open(dir.path().join("b.db")).unwrap();
    let pool = BufferPoolManager::new(4);

    let (page_a, guard) = pool.alloc_page(&file_a).expect("alloc a");
    drop(guard);
    pool.unpin_page(&file_a, page_a, false).unwrap();
    let (page_b, guard) = pool.alloc_page(&file_b).expect("alloc b");
    drop(guard);
    pool.unpin_page(&file_b, page_b, false).unwrap();

    // both files hand out page 1; the pool must keep them apart
    assert_eq!(page_a, page_b);
    fill_page(&pool, &file_a, page_a, 0xAA);
    fill_page(&pool, &file_b, page_b, 0xBB);
    pool.flush_file(&file_a).unwrap();
    pool.flush_file(&file_b).unwrap();

    assert_eq!(first_byte(&pool, &file_a, page_a), 0xAA);
    assert_eq!(first_byte(&pool, &file_b, page_b), 0xBB);
}

#[test]
fn exhausted_pool_reports_and_recovers() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let file = FileHandle::open(dir.path().join("data.db")).unwrap();
    let pool = BufferPoolManager::new(2);

    let (first, guard) = pool.alloc_page(&file).expect("alloc");
    drop(guard);
    let (second, guard) = pool.alloc_page(&file).expect("alloc");
    drop(guard);

    let err = pool.alloc_page(&file).expect_err("both frames pinned");
    assert!(matches!(err, bufpool::BufferPoolError::BufferExceeded(2)));

    // releasing one pin makes the pool usable again
    pool.unpin_page(&file, first, false).unwrap();
    let (third, guard) = pool.alloc_page(&file).expect("alloc after unpin");
    drop(guard);
    assert_ne!(third, first);
    assert_ne!(third, second);
    pool.unpin_page(&file, second, false).unwrap();
    pool.unpin_page(&file, third, false).unwrap();
}

#[test]
fn disposed_pages_are_gone_from_pool_and_file() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let file = FileHandle::open(dir.path().join("data.db")).unwrap();
    let pool = BufferPoolManager::new(2);

    let (page_no, guard) = pool.alloc_page(&file).expect("alloc");
    drop(guard);
    pool.unpin_page(&file, page_no, false).unwrap();

    pool.dispose_page(&file, page_no).expect("dispose");
    let err = pool.read_page(&file, page_no).expect_err("deleted page");
    assert!(matches!(err, bufpool::BufferPoolError::Io(_)));
}

#[test]
fn full_page_writes_survive_eviction() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let file = FileHandle::open(dir.path().join("data.db")).unwrap();
    let pool = BufferPoolManager::new(1);

    let (page_no, mut guard) = pool.alloc_page(&file).expect("alloc");
    let mut payload = [0u8; PAGE_SIZE];
    payload[0] = 0xAB;
    payload[PAGE_SIZE - 1] = 0xCD;
    guard.data_mut().copy_from_slice(&payload);
    drop(guard);
    pool.unpin_page(&file, page_no, true).unwrap();

    // force the single frame through an eviction cycle
    let (other, guard) = pool.alloc_page(&file).expect("alloc other");
    drop(guard);
    pool.unpin_page(&file, other, false).unwrap();

    let guard = pool.read_page(&file, page_no).expect("read back");
    assert_eq!(guard.data()[0], 0xAB);
    assert_eq!(guard.data()[PAGE_SIZE - 1], 0xCD);
    drop(guard);
    pool.unpin_page(&file, page_no, false).unwrap();
}
