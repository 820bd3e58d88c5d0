mod common;

use common::{Harness, T0};
use historian::{DataPoint, HistoryBackend, SearchDirection, Value};

#[test]
fn every_value_kind_round_trips() {
    let mut h = Harness::new();
    let values = [
        ("bool", Value::Bool(true), Value::Int(1)),
        ("int", Value::Int(-42), Value::Int(-42)),
        ("float", Value::Float(2.5), Value::Float(2.5)),
        ("text", Value::Text("open".into()), Value::Text("open".into())),
        ("bytes", Value::Bytes(vec![1, 2, 3]), Value::Bytes(vec![1, 2, 3])),
        ("stamp", Value::DateTime(T0), Value::Int(T0)),
    ];
    for (i, (series, value, _)) in values.iter().enumerate() {
        assert!(h.write_at(series, T0 + i as i64, value.clone()));
    }
    for (i, (series, _, stored)) in values.iter().enumerate() {
        let t = T0 + i as i64;
        assert!(h.historian.has_timestamp(series, t, &mut h.log));
        let points = h.historian.read_range(series, t, 0, 1, &mut h.log).expect("read");
        assert_eq!(points[0], DataPoint::new(t, stored.clone(), 0), "{series}");
    }
    h.assert_clean();
}

#[test]
fn batched_point_is_visible_after_flush() {
    let mut h = Harness::with_config(|config| config.transaction_timeout_ms = 10_000);
    assert!(h.write_at("flow", T0 + 5, Value::Float(9.0)));
    assert!(h.historian.flush(&mut h.log));
    assert!(!h.historian.has_open_transaction());
    assert!(h.historian.has_timestamp("flow", T0 + 5, &mut h.log));
    h.assert_clean();
}

#[test]
fn backend_trait_object_delegates() {
    let mut h = Harness::new();
    h.clock.set(T0);
    let log = &mut h.log;
    let backend: &mut dyn HistoryBackend = &mut h.historian;

    assert!(backend.write("flow", &DataPoint::new(T0, Value::Int(7), 0), log));
    assert!(backend.write("flow", &DataPoint::new(T0 + 5, Value::Int(8), 0), log));
    assert_eq!(backend.first_timestamp("flow", log), Some(T0));
    assert_eq!(backend.last_timestamp("flow", log), Some(T0 + 5));
    assert_eq!(backend.find_timestamp("flow", T0, SearchDirection::Above, log), Some(T0 + 5));
    assert_eq!(backend.count_in_range("flow", T0, None, log), Some(2));
    backend.tick();
    assert!(!log.has_errors());
}
