//! Concurrency scenarios for the hierarchical lock manager.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use fuse_vfs_adapter::locks::LockManager;

/// Long enough that a blocked thread is a real failure, not scheduling noise.
const LONG: Duration = Duration::from_secs(10);
/// Long enough that "still blocked after this" means the lock is held.
const SHORT: Duration = Duration::from_millis(200);

#[test]
fn concurrent_reads_on_disjoint_paths_do_not_block() {
    let locks = Arc::new(LockManager::new());
    let (ready_tx, ready_rx) = mpsc::channel();
    let barrier = Arc::new(Barrier::new(3));

    let handles: Vec<_> = ["/a/b", "/x/y"]
        .into_iter()
        .map(|path| {
            let locks = locks.clone();
            let ready_tx = ready_tx.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let _held = locks.lock_path_for_reading(path);
                ready_tx.send(path).unwrap();
                // keep holding until the main thread has seen both readers
                barrier.wait();
            })
        })
        .collect();

    // Both threads must report while the other still holds its lock.
    for _ in 0..2 {
        ready_rx
            .recv_timeout(LONG)
            .expect("reader on a disjoint path blocked");
    }
    barrier.wait();
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn writer_blocks_until_reader_releases() {
    let locks = Arc::new(LockManager::new());
    let reader = locks.lock_path_for_reading("/a/b");

    let (done_tx, done_rx) = mpsc::channel();
    let writer = {
        let locks = locks.clone();
        thread::spawn(move || {
            let _held = locks.lock_path_for_writing("/a/b");
            done_tx.send(()).unwrap();
        })
    };

    assert!(
        done_rx.recv_timeout(SHORT).is_err(),
        "writer acquired the lock while a reader held it"
    );
    drop(reader);
    done_rx
        .recv_timeout(LONG)
        .expect("writer did not proceed after the reader released");
    writer.join().unwrap();
}

#[test]
fn parent_write_excludes_child_read() {
    let locks = Arc::new(LockManager::new());
    let parent = locks.lock_path_for_writing("/a");

    let (done_tx, done_rx) = mpsc::channel();
    let child_reader = {
        let locks = locks.clone();
        thread::spawn(move || {
            let _held = locks.lock_path_for_reading("/a/b");
            done_tx.send(()).unwrap();
        })
    };

    assert!(
        done_rx.recv_timeout(SHORT).is_err(),
        "child read acquired while the parent was write-locked"
    );
    drop(parent);
    done_rx
        .recv_timeout(LONG)
        .expect("child read did not proceed after the parent released");
    child_reader.join().unwrap();
}

#[test]
fn sibling_subtrees_are_not_affected_by_a_writer() {
    let locks = Arc::new(LockManager::new());
    let _writer = locks.lock_path_for_writing("/a/b");

    let (done_tx, done_rx) = mpsc::channel();
    let outside = {
        let locks = locks.clone();
        thread::spawn(move || {
            let _held = locks.lock_path_for_reading("/x/y");
            done_tx.send(()).unwrap();
        })
    };

    done_rx
        .recv_timeout(LONG)
        .expect("reader outside the written subtree blocked");
    outside.join().unwrap();
}

#[test]
fn crossing_renames_do_not_deadlock() {
    let locks = Arc::new(LockManager::new());
    let (done_tx, done_rx) = mpsc::channel();

    let handles: Vec<_> = [("/a/x", "/b/y"), ("/b/y", "/a/x")]
        .into_iter()
        .map(|(src, dst)| {
            let locks = locks.clone();
            let done_tx = done_tx.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    let pair = locks.lock_pair_for_writing(src, dst);
                    let _src_data = pair.lock_source_data_for_writing();
                    let _dst_data = pair.lock_target_data_for_writing();
                }
                done_tx.send(()).unwrap();
            })
        })
        .collect();

    for _ in 0..2 {
        done_rx
            .recv_timeout(Duration::from_secs(30))
            .expect("crossing renames deadlocked");
    }
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn lock_maps_drain_after_quiescing() {
    let locks = Arc::new(LockManager::new());
    assert_eq!(locks.path_lock_count(), 0);

    {
        let path = locks.lock_path_for_reading("/a/b/c");
        let _data = path.lock_data_for_writing();
        assert!(locks.is_path_locked("/a/b/c"));
    }
    assert!(!locks.is_path_locked("/a/b/c"));
    assert_eq!(locks.path_lock_count(), 0);
    assert_eq!(locks.data_lock_count(), 0);

    // The same must hold after heavy concurrent churn.
    let paths = ["/a/b/c", "/a/b/d", "/a/e", "/f", "/f/g/h/i"];
    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let locks = locks.clone();
            thread::spawn(move || {
                for round in 0..100 {
                    let path = paths[(worker + round) % paths.len()];
                    if round % 3 == 0 {
                        let held = locks.lock_path_for_writing(path);
                        let _data = held.lock_data_for_writing();
                    } else {
                        let held = locks.lock_path_for_reading(path);
                        let _data = held.lock_data_for_reading();
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(locks.path_lock_count(), 0);
    assert_eq!(locks.data_lock_count(), 0);
}

#[test]
fn ancestors_are_read_locked_while_a_descendant_is_held() {
    let locks = Arc::new(LockManager::new());
    let held = locks.lock_path_for_writing("/a/b/c");
    for ancestor in ["/a/b", "/a", "/"] {
        assert!(
            locks.is_path_locked(ancestor),
            "expected an entry for ancestor {ancestor}"
        );
    }
    drop(held);
    assert_eq!(locks.path_lock_count(), 0);
}

#[test]
fn writer_is_not_starved_by_reader_churn() {
    let locks = Arc::new(LockManager::new());
    let stop = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let locks = locks.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    let _held = locks.lock_path_for_reading("/hot");
                }
            })
        })
        .collect();

    // let the reader stream establish itself
    thread::sleep(Duration::from_millis(50));

    let start = Instant::now();
    {
        let _writer = locks.lock_path_for_writing("/hot");
    }
    let waited = start.elapsed();

    stop.store(true, Ordering::Relaxed);
    for reader in readers {
        reader.join().unwrap();
    }

    assert!(
        waited < Duration::from_secs(5),
        "writer waited {waited:?} behind a stream of readers"
    );
}
