//! End-to-end coverage of the public API against scratch directories,
//! exercising the scenarios that only make sense from outside the crate
//! (swap spill growth, many concurrent handles sharing one keydir).

use keydir::{Keydir, OpStatus, Record};

fn temp_basedir(name: &str) -> std::path::PathBuf {
    std::env::temp_dir()
        .join("keydir_integration_test")
        .join(format!("{name}_{}", std::process::id()))
}

fn record(file_id: u32, offset: u64) -> Record {
    Record {
        file_id,
        total_size: 24,
        offset,
        timestamp: offset as u32,
    }
}

#[test]
fn swap_spill_doubles_and_keeps_prior_keys_gettable() {
    let dir = temp_basedir("swap_spill");
    let kd = Keydir::init(&dir, 4, 4).unwrap();

    let mut keys = Vec::new();
    for i in 0..200u32 {
        let key = format!("swap-key-{i}");
        kd.put(key.as_bytes(), record(i, i as u64), None).unwrap();
        keys.push(key);
    }

    for (i, key) in keys.iter().enumerate() {
        let got = kd.get(key.as_bytes(), keydir::MAX_EPOCH).unwrap().unwrap();
        assert_eq!(got.file_id, i as u32);
        assert_eq!(got.offset, i as u64);
    }
}

#[test]
fn cloned_handles_share_the_same_index() {
    let dir = temp_basedir("shared_handle");
    let kd = Keydir::init(&dir, 8, 2).unwrap();
    let kd2 = kd.clone();

    kd.put(b"shared", record(1, 10), None).unwrap();
    let got = kd2.get(b"shared", keydir::MAX_EPOCH).unwrap().unwrap();
    assert_eq!(got.offset, 10);
}

#[test]
fn concurrent_puts_to_distinct_keys_all_land() {
    let dir = temp_basedir("concurrent");
    let kd = Keydir::init(&dir, 16, 4).unwrap();

    std::thread::scope(|s| {
        for t in 0..8 {
            let kd = kd.clone();
            s.spawn(move || {
                for i in 0..50u32 {
                    let key = format!("t{t}-k{i}");
                    kd.put(key.as_bytes(), record(t, i as u64), None).unwrap();
                }
            });
        }
    });

    for t in 0..8u32 {
        for i in 0..50u32 {
            let key = format!("t{t}-k{i}");
            let got = kd.get(key.as_bytes(), keydir::MAX_EPOCH).unwrap().unwrap();
            assert_eq!(got.file_id, t);
            assert_eq!(got.offset, i as u64);
        }
    }
}

#[test]
fn epoch_cas_semantics_end_to_end() {
    let dir = temp_basedir("epoch_cas");
    let kd = Keydir::init(&dir, 8, 2).unwrap();

    kd.put(b"k", record(1, 10), None).unwrap();
    kd.set_min_epoch(1);
    let e0 = kd.current_epoch();
    kd.put(b"k", record(1, 20), None).unwrap();

    assert_eq!(kd.get(b"k", e0).unwrap().unwrap().offset, 10);
    assert_eq!(kd.get(b"k", keydir::MAX_EPOCH).unwrap().unwrap().offset, 20);

    let status = kd.put(b"k", record(1, 30), Some((1, 10))).unwrap();
    assert_eq!(status, OpStatus::Modified);

    let status = kd.put(b"k", record(1, 30), Some((1, 20))).unwrap();
    assert_eq!(status, OpStatus::Ok);
    assert_eq!(kd.get(b"k", keydir::MAX_EPOCH).unwrap().unwrap().offset, 30);
}
