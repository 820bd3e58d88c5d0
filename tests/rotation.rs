mod common;

use common::{Harness, T0};
use historian::{DataPoint, Value};

/// 64-byte payload: 8 bytes of time plus 56 bytes of value.
fn payload(i: i64) -> Value {
    let mut bytes = vec![0u8; 56];
    bytes[..8].copy_from_slice(&i.to_le_bytes());
    Value::Bytes(bytes)
}

#[test]
fn fifty_thousand_points_rotate_past_one_megabyte() {
    let mut h = Harness::with_config(|config| {
        config.file_size_limit_mb = 1;
        config.transaction_timeout_ms = 1_000;
    });

    let points = 50_000;
    for i in 0..points {
        let t = T0 + i;
        h.clock.set(t);
        assert!(
            h.historian.write("temp1", &DataPoint::new(t, payload(i), 0), &mut h.log),
            "write {i}: {:?}",
            h.log.entries()
        );
    }
    assert!(h.historian.flush(&mut h.log));
    h.assert_clean();

    let files = h.historian.files();
    assert!(files.len() >= 2, "expected rotation, got {files:?}");
    let keys: Vec<i64> = files.iter().map(|f| f.key).collect();
    assert!(keys.windows(2).all(|w| w[0] < w[1]));

    let t_n = T0 + points - 1;
    assert_eq!(
        h.historian.count_in_range("temp1", T0, Some(t_n), &mut h.log),
        Some(points as u64)
    );
    assert_eq!(h.historian.last_timestamp("temp1", &mut h.log), Some(t_n));
    h.assert_clean();
}

#[test]
fn writes_land_in_the_newest_file() {
    let mut h = Harness::new();
    assert!(h.write_at("level", T0, Value::Float(1.0)));
    h.start_file_at(T0 + 1_000);
    assert!(h.write_at("level", T0 + 1_001, Value::Float(2.0)));

    let files = h.historian.files();
    assert_eq!(files.last().map(|f| f.key), Some(T0 + 1_000));
    // The older file never saw the second point.
    let older = files.first().expect("older file");
    let conn = rusqlite::Connection::open(&older.path).expect("open older");
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM \"level\"", [], |row| row.get(0))
        .expect("count");
    assert_eq!(count, 1);
    h.assert_clean();
}

#[test]
fn batched_writes_commit_on_the_timer() {
    let mut h = Harness::with_config(|config| config.transaction_timeout_ms = 500);
    assert!(h.write_at("flow", T0, Value::Int(1)));
    assert!(h.write_at("flow", T0 + 10, Value::Int(2)));
    assert!(h.historian.has_open_transaction());

    h.clock.set(T0 + 600);
    h.historian.tick();
    assert!(!h.historian.has_open_transaction());
    assert!(h.historian.has_timestamp("flow", T0 + 10, &mut h.log));
    h.assert_clean();
}

#[test]
fn disabling_batching_commits_the_open_transaction() {
    let mut h = Harness::with_config(|config| config.transaction_timeout_ms = 60_000);
    assert!(h.write_at("flow", T0, Value::Int(1)));
    assert!(h.historian.has_open_transaction());

    h.historian.set_transaction_timeout_ms(0);
    h.historian.tick();
    assert!(!h.historian.has_open_transaction());

    assert!(h.write_at("flow", T0 + 1, Value::Int(2)));
    assert!(!h.historian.has_open_transaction());
    h.assert_clean();
}

#[test]
fn duplicate_timestamp_is_rejected() {
    let mut h = Harness::new();
    assert!(h.write_at("flow", T0, Value::Int(1)));
    assert!(!h.write_at("flow", T0, Value::Int(2)));
    assert!(h.log.has_errors());
}

#[test]
fn reserved_series_names_are_rejected() {
    let mut h = Harness::new();
    assert!(!h.write_at("__EventTypes", T0, Value::Int(1)));
    assert!(!h.write_at("evt:Alarm", T0, Value::Int(1)));
    assert!(!h.write_at("", T0, Value::Int(1)));
    assert!(!h.write_at("sqlite_master", T0, Value::Int(1)));
    assert_eq!(h.log.count(historian::Severity::Error), 4);
    assert!(h
        .log
        .entries()
        .iter()
        .filter(|e| e.severity == historian::Severity::Error)
        .all(|e| e.category == historian::Category::Schema));
}

#[test]
fn series_named_like_index_suffixes_are_writable() {
    let mut h = Harness::new();
    assert!(h.write_at("a", T0, Value::Int(1)));
    assert!(h.write_at("a__Time", T0 + 1, Value::Int(2)));
    assert!(h.write_at("a__TimeType", T0 + 2, Value::Int(3)));
    assert_eq!(h.historian.last_timestamp("a__Time", &mut h.log), Some(T0 + 1));
    h.assert_clean();
}

#[test]
fn late_point_behind_an_older_file_is_rejected() {
    let mut h = Harness::new();
    for i in 0..10 {
        assert!(h.write_at("flow", T0 + i * 10, Value::Int(i)));
    }
    h.start_file_at(T0 + 1_000);

    // Behind data in the older file: duplicate and out of order.
    h.clock.set(T0 + 1_001);
    assert!(!h.historian.write("flow", &DataPoint::new(T0 + 50, Value::Int(99), 0), &mut h.log));
    assert!(!h.historian.write("flow", &DataPoint::new(T0 + 90, Value::Int(99), 0), &mut h.log));
    assert_eq!(h.log.count(historian::Severity::Error), 2);
    assert!(h
        .log
        .entries()
        .iter()
        .filter(|e| e.severity == historian::Severity::Error)
        .all(|e| e.category == historian::Category::Consistency));
    let _ = h.log.drain();

    // Past the older file's last point, even if before the new file's key.
    assert!(h.historian.write("flow", &DataPoint::new(T0 + 95, Value::Int(10), 0), &mut h.log));
    assert!(h.historian.write("flow", &DataPoint::new(T0 + 1_001, Value::Int(11), 0), &mut h.log));
    // Earlier than the new file's first point but still after the older file.
    assert!(h.historian.write("flow", &DataPoint::new(T0 + 92, Value::Int(12), 0), &mut h.log));
    h.assert_clean();

    let points = h.historian.read_range("flow", T0, 0, 13, &mut h.log).expect("read");
    let times: Vec<i64> = points.iter().map(|p| p.timestamp).collect();
    assert!(times.windows(2).all(|w| w[0] < w[1]), "{times:?}");
    assert_eq!(h.historian.count_in_range("flow", T0, None, &mut h.log), Some(13));
}

#[test]
fn unbatched_rotation_waits_for_the_check_interval() {
    let mut h = Harness::with_config(|config| {
        config.file_size_limit_mb = 1;
        config.rotation_check_interval_ms = 10_000;
    });
    assert!(h.write_at("small", T0, Value::Int(1)));
    assert!(h.write_at("big", T0 + 1_000, Value::Bytes(vec![7u8; 1_200_000])));
    assert!(h.write_at("small", T0 + 2_000, Value::Int(2)));
    assert_eq!(h.historian.files().len(), 1);

    assert!(h.write_at("small", T0 + 10_000, Value::Int(3)));
    let files = h.historian.files();
    assert_eq!(files.len(), 2, "{files:?}");
    assert_eq!(files[1].key, T0 + 10_000);
    assert_eq!(h.historian.count_in_range("small", T0, None, &mut h.log), Some(3));
    h.assert_clean();
}

#[test]
fn unbatched_rotation_with_zero_interval_checks_every_write() {
    let mut h = Harness::with_config(|config| {
        config.file_size_limit_mb = 1;
        config.rotation_check_interval_ms = 0;
    });
    assert!(h.write_at("small", T0, Value::Int(1)));
    assert_eq!(h.historian.files().len(), 1);

    assert!(h.write_at("big", T0 + 5, Value::Bytes(vec![7u8; 1_200_000])));
    assert_eq!(h.historian.files().len(), 2);

    assert!(h.write_at("small", T0 + 10, Value::Int(2)));
    assert_eq!(h.historian.files().len(), 2);
    h.assert_clean();
}
