mod common;

use common::{Harness, T0};
use historian::{DataPoint, SearchDirection, Value};

const B: i64 = T0 + 10_000;
const C: i64 = T0 + 20_000;

/// Three files: ten points at T0, ten at B, five at C.
fn three_files() -> Harness {
    let mut h = Harness::new();
    for i in 0..10 {
        assert!(h.write_at("flow", T0 + i, Value::Int(i)));
    }
    h.start_file_at(B);
    for i in 0..10 {
        assert!(h.write_at("flow", B + i, Value::Int(100 + i)));
    }
    h.start_file_at(C);
    for i in 0..5 {
        assert!(h.write_at("flow", C + i, Value::Int(200 + i)));
    }
    assert_eq!(h.historian.files().len(), 3);
    h.assert_clean();
    h
}

fn timestamps(points: &[DataPoint]) -> Vec<i64> {
    points.iter().filter(|p| !p.is_placeholder()).map(|p| p.timestamp).collect()
}

#[test]
fn read_range_stitches_files_in_order() {
    let mut h = three_files();
    let points = h
        .historian
        .read_range("flow", 0, 0, 30, &mut h.log)
        .expect("read");

    assert_eq!(points.len(), 30);
    let stamps = timestamps(&points);
    assert_eq!(stamps.len(), 25);
    assert!(stamps.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(stamps[0], T0);
    assert_eq!(stamps[10], B);
    assert_eq!(stamps[24], C + 4);
    assert!(points[25..].iter().all(DataPoint::is_placeholder));
    assert_eq!(points[12].value, Value::Int(102));
    h.assert_clean();
}

#[test]
fn consecutive_pages_are_contiguous() {
    let mut h = three_files();
    let start = T0 + 5;
    let first = h.historian.read_range("flow", start, 3, 7, &mut h.log).expect("page 1");
    let second = h.historian.read_range("flow", start, 10, 7, &mut h.log).expect("page 2");
    let both = h.historian.read_range("flow", start, 3, 14, &mut h.log).expect("both");

    assert_eq!(timestamps(&first), timestamps(&both[..7]));
    assert_eq!(timestamps(&second), timestamps(&both[7..]));
    assert_eq!(timestamps(&first)[0], T0 + 8);
    assert_eq!(timestamps(&second)[0], B + 5);
    h.assert_clean();
}

#[test]
fn offset_past_the_end_is_all_placeholders() {
    let mut h = three_files();
    let points = h.historian.read_range("flow", 0, 100, 4, &mut h.log).expect("read");
    assert_eq!(points.len(), 4);
    assert!(points.iter().all(DataPoint::is_placeholder));

    let empty = h.historian.read_range("flow", 0, 0, 0, &mut h.log).expect("read");
    assert!(empty.is_empty());
}

#[test]
fn counts_sum_across_files() {
    let mut h = three_files();
    assert_eq!(h.historian.count_in_range("flow", 0, None, &mut h.log), Some(25));
    assert_eq!(h.historian.count_in_range("flow", T0 + 5, None, &mut h.log), Some(20));
    assert_eq!(
        h.historian.count_in_range("flow", T0 + 5, Some(B + 4), &mut h.log),
        Some(10)
    );
    assert_eq!(h.historian.count_in_range("flow", C, Some(B), &mut h.log), Some(0));
    assert_eq!(h.historian.count_in_range("missing", 0, None, &mut h.log), Some(0));
    h.assert_clean();
}

#[test]
fn first_and_last_span_all_files() {
    let mut h = three_files();
    assert_eq!(h.historian.first_timestamp("flow", &mut h.log), Some(T0));
    assert_eq!(h.historian.last_timestamp("flow", &mut h.log), Some(C + 4));
    assert_eq!(h.historian.first_timestamp("missing", &mut h.log), None);
    h.assert_clean();
}

#[test]
fn neighbour_search_is_strict() {
    let mut h = three_files();
    let log = &mut h.log;
    let hist = &mut h.historian;

    assert_eq!(hist.find_timestamp("flow", T0 + 9, SearchDirection::Above, log), Some(B));
    assert_eq!(hist.find_timestamp("flow", B, SearchDirection::Below, log), Some(T0 + 9));
    assert_eq!(hist.find_timestamp("flow", T0 - 1, SearchDirection::Above, log), Some(T0));
    assert_eq!(hist.find_timestamp("flow", C + 4, SearchDirection::Above, log), None);
    assert_eq!(hist.find_timestamp("flow", T0, SearchDirection::Below, log), None);

    for t in [T0, T0 + 3, T0 + 500, B, B + 9, C - 1, C + 2, C + 1_000] {
        if let Some(above) = hist.find_timestamp("flow", t, SearchDirection::Above, log) {
            assert!(above > t, "above {t} returned {above}");
        }
        if let Some(below) = hist.find_timestamp("flow", t, SearchDirection::Below, log) {
            assert!(below < t, "below {t} returned {below}");
        }
    }
    assert!(!log.has_errors());
}

#[test]
fn has_timestamp_checks_exact_points() {
    let mut h = three_files();
    assert!(h.historian.has_timestamp("flow", B + 5, &mut h.log));
    assert!(!h.historian.has_timestamp("flow", B + 50, &mut h.log));
    h.assert_clean();

    // Before the oldest file: an out-of-range query, reported as an error.
    assert!(!h.historian.has_timestamp("flow", T0 - 10, &mut h.log));
    assert!(h.log.has_errors());
}

#[test]
fn oversized_limit_is_capped_with_one_placeholder() {
    let mut h = Harness::with_config(|config| config.max_read_points = 5);
    for i in 0..8 {
        assert!(h.write_at("flow", T0 + i, Value::Int(i)));
    }

    let points = h
        .historian
        .read_range("flow", T0, 0, usize::MAX / 2, &mut h.log)
        .expect("read");
    assert_eq!(points.len(), 6);
    assert_eq!(timestamps(&points), (T0..T0 + 5).collect::<Vec<_>>());
    assert!(points[5].is_placeholder());
    assert_eq!(h.log.count(historian::Severity::Warning), 1);
    h.assert_clean();

    // At the cap itself nothing is trimmed.
    let points = h.historian.read_range("flow", T0, 3, 5, &mut h.log).expect("read");
    assert_eq!(points.len(), 5);
    assert_eq!(timestamps(&points), (T0 + 3..T0 + 8).collect::<Vec<_>>());
}

#[test]
fn huge_limit_on_default_config_does_not_allocate_it() {
    let mut h = Harness::new();
    assert!(h.write_at("flow", T0, Value::Int(1)));
    let points = h
        .historian
        .read_range("flow", T0, 0, usize::MAX, &mut h.log)
        .expect("read");
    assert_eq!(timestamps(&points), vec![T0]);
    assert_eq!(points.len(), 2);
    h.assert_clean();
}
