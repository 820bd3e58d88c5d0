mod common;

use common::{Harness, T0};
use historian::{EventPoint, FieldSpec, FieldType, SearchDirection, Value};

fn alarm(t: i64, message: &str, severity: i64) -> EventPoint {
    EventPoint::new(t)
        .with_field("Message", Value::Text(message.to_string()))
        .with_field("Severity", Value::Int(severity))
}

fn write(h: &mut Harness, event_type: &str, emitters: &[&str], event: EventPoint) -> bool {
    h.clock.set(event.time);
    h.historian.write_event(event_type, emitters, &event, &mut h.log)
}

#[test]
fn events_fan_out_to_every_emitter() {
    let mut h = Harness::new();
    assert!(write(&mut h, "Alarm", &["Pump1", "Pump2"], alarm(T0, "high", 3)));
    assert!(write(&mut h, "Alarm", &["Pump1"], alarm(T0 + 10, "low", 1)));
    assert!(write(&mut h, "Audit", &["Pump1"], EventPoint::new(T0 + 20)));

    let hist = &mut h.historian;
    let log = &mut h.log;
    assert_eq!(hist.count_events("Pump1", "Alarm", T0, None, log), Some(2));
    assert_eq!(hist.count_events("Pump2", "Alarm", T0, None, log), Some(1));
    assert_eq!(hist.count_events("Pump1", "Alarm", T0 + 1, Some(T0 + 10), log), Some(1));
    assert_eq!(hist.count_events("Pump2", "Audit", T0, None, log), Some(0));
    assert_eq!(hist.count_events("Nobody", "Alarm", T0, None, log), Some(0));

    assert_eq!(
        hist.event_types_of_emitter("Pump1", log),
        Some(vec!["Alarm".to_string(), "Audit".to_string()])
    );
    assert_eq!(hist.event_types_of_emitter("Pump2", log), Some(vec!["Alarm".to_string()]));
    assert!(!log.has_errors(), "{:?}", log.entries());
}

#[test]
fn event_search_is_strict() {
    let mut h = Harness::new();
    for i in 0..3 {
        assert!(write(&mut h, "Alarm", &["Pump1"], alarm(T0 + i * 100, "tick", i)));
    }
    assert!(write(&mut h, "Audit", &["Pump1"], EventPoint::new(T0 + 150)));

    let hist = &mut h.historian;
    let log = &mut h.log;
    let find = |hist: &mut historian::Historian, log: &mut historian::LogSink, t, dir| {
        hist.find_event_timestamp("Pump1", "Alarm", t, dir, log)
    };
    assert_eq!(find(hist, log, T0 + 100, SearchDirection::Above), Some(T0 + 200));
    assert_eq!(find(hist, log, T0 + 100, SearchDirection::Below), Some(T0));
    assert_eq!(find(hist, log, T0 + 120, SearchDirection::Above), Some(T0 + 200));
    assert_eq!(find(hist, log, T0 + 200, SearchDirection::Above), None);
    assert_eq!(find(hist, log, T0, SearchDirection::Below), None);
    assert_eq!(
        hist.find_event_timestamp("Pump1", "Audit", T0 + 150, SearchDirection::Above, log),
        None
    );
    assert!(!log.has_errors(), "{:?}", log.entries());
}

#[test]
fn read_events_coerces_and_drops_unknown_fields() {
    let mut h = Harness::new();
    assert!(write(&mut h, "Alarm", &["Pump1"], alarm(T0, "high", 3)));
    // A new field grows the event table.
    let acked = alarm(T0 + 10, "low", 1).with_field("Acked", Value::Bool(true));
    assert!(write(&mut h, "Alarm", &["Pump1"], acked));
    // Null fields are not stored.
    let sparse = EventPoint::new(T0 + 20).with_field("Message", Value::Null);
    assert!(write(&mut h, "Alarm", &["Pump1"], sparse));

    let fields = [
        FieldSpec::new("Message", FieldType::Text),
        FieldSpec::new("Severity", FieldType::Float),
        FieldSpec::new("Acked", FieldType::Boolean),
        FieldSpec::new("NotAColumn", FieldType::Text),
    ];
    let events = h
        .historian
        .read_events("Pump1", "Alarm", T0, 0, 10, &fields, &mut h.log)
        .expect("read events");
    h.assert_clean();

    assert_eq!(events.len(), 3);
    assert_eq!(events[0].time, T0);
    assert_eq!(events[0].fields.get("Severity"), Some(&Value::Float(3.0)));
    assert_eq!(events[0].fields.get("Acked"), None);
    assert!(!events[0].fields.contains_key("NotAColumn"));
    assert_eq!(events[1].fields.get("Acked"), Some(&Value::Bool(true)));
    assert!(events[2].fields.is_empty());

    let page = h
        .historian
        .read_events("Pump1", "Alarm", T0, 1, 1, &fields[..1], &mut h.log)
        .expect("page");
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].fields.get("Message"), Some(&Value::Text("low".into())));
}

#[test]
fn failed_coercion_keeps_the_stored_value() {
    let mut h = Harness::new();
    assert!(write(&mut h, "Alarm", &["Pump1"], alarm(T0, "high", 3)));
    let events = h
        .historian
        .read_events(
            "Pump1",
            "Alarm",
            T0,
            0,
            1,
            &[FieldSpec::new("Message", FieldType::Integer)],
            &mut h.log,
        )
        .expect("read");
    assert_eq!(events[0].fields.get("Message"), Some(&Value::Text("high".into())));
}

#[test]
fn events_without_emitters_are_rejected() {
    let mut h = Harness::new();
    assert!(!write(&mut h, "Alarm", &[], alarm(T0, "orphan", 1)));
    assert!(h.log.has_errors());
    assert!(!write(&mut h, "Alarm", &["Pump1", ""], alarm(T0, "bad", 1)));
    assert_eq!(h.historian.count_events("Pump1", "Alarm", 0, None, &mut h.log), Some(0));
}

#[test]
fn row_key_field_name_is_a_schema_error() {
    let mut h = Harness::new();
    let event = alarm(T0, "clash", 1).with_field("_RowId", Value::Int(5));
    assert!(!write(&mut h, "Alarm", &["Pump1"], event));
    let errors: Vec<_> = h
        .log
        .entries()
        .iter()
        .filter(|e| e.severity == historian::Severity::Error)
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].category, historian::Category::Schema);
    assert!(errors[0].message.contains("_RowId"), "{}", errors[0].message);

    // Nothing half-written: the same type still works without the clashing field.
    assert!(write(&mut h, "Alarm", &["Pump1"], alarm(T0 + 1, "ok", 1)));
    assert_eq!(h.historian.count_events("Pump1", "Alarm", T0, None, &mut h.log), Some(1));
}

#[test]
fn events_are_stitched_across_files() {
    let mut h = Harness::new();
    assert!(write(&mut h, "Alarm", &["Pump1"], alarm(T0, "first", 1)));
    h.start_file_at(T0 + 1_000);
    assert!(write(&mut h, "Alarm", &["Pump1"], alarm(T0 + 1_500, "second", 2)));

    let events = h
        .historian
        .read_events(
            "Pump1",
            "Alarm",
            T0,
            0,
            10,
            &[FieldSpec::new("Message", FieldType::Text)],
            &mut h.log,
        )
        .expect("read");
    let times: Vec<i64> = events.iter().map(|e| e.time).collect();
    assert_eq!(times, vec![T0, T0 + 1_500]);
    assert_eq!(
        h.historian.find_event_timestamp("Pump1", "Alarm", T0, SearchDirection::Above, &mut h.log),
        Some(T0 + 1_500)
    );
    assert_eq!(h.historian.count_events("Pump1", "Alarm", T0, None, &mut h.log), Some(2));
    h.assert_clean();
}
