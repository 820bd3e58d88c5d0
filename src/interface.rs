//! Callback-style surface consumed by an external node/event engine.
//!
//! Every method takes the caller's log sink and reports failure only through its
//! return value, so an engine can hold a `Box<dyn HistoryBackend>` without caring
//! which storage sits behind it.

use crate::historian::{Historian, SearchDirection};
use crate::log_sink::LogSink;
use crate::value::{DataPoint, EventPoint, FieldSpec};

pub trait HistoryBackend {
    fn write(&mut self, series: &str, point: &DataPoint, sink: &mut LogSink) -> bool;

    fn first_timestamp(&mut self, series: &str, sink: &mut LogSink) -> Option<i64>;

    fn last_timestamp(&mut self, series: &str, sink: &mut LogSink) -> Option<i64>;

    fn has_timestamp(&mut self, series: &str, t: i64, sink: &mut LogSink) -> bool;

    fn find_timestamp(
        &mut self,
        series: &str,
        t: i64,
        direction: SearchDirection,
        sink: &mut LogSink,
    ) -> Option<i64>;

    fn count_in_range(&mut self, series: &str, start: i64, end: Option<i64>, sink: &mut LogSink) -> Option<u64>;

    fn read_range(
        &mut self,
        series: &str,
        start: i64,
        offset: u64,
        limit: usize,
        sink: &mut LogSink,
    ) -> Option<Vec<DataPoint>>;

    fn write_event(&mut self, event_type: &str, emitters: &[&str], event: &EventPoint, sink: &mut LogSink) -> bool;

    fn event_types_of_emitter(&mut self, emitter: &str, sink: &mut LogSink) -> Option<Vec<String>>;

    fn find_event_timestamp(
        &mut self,
        emitter: &str,
        event_type: &str,
        t: i64,
        direction: SearchDirection,
        sink: &mut LogSink,
    ) -> Option<i64>;

    fn count_events(
        &mut self,
        emitter: &str,
        event_type: &str,
        start: i64,
        end: Option<i64>,
        sink: &mut LogSink,
    ) -> Option<u64>;

    #[allow(clippy::too_many_arguments)]
    fn read_events(
        &mut self,
        emitter: &str,
        event_type: &str,
        start: i64,
        offset: u64,
        limit: usize,
        fields: &[FieldSpec],
        sink: &mut LogSink,
    ) -> Option<Vec<EventPoint>>;

    /// Periodic servicing hook for hosts without their own call cadence.
    fn tick(&mut self) {}
}

impl HistoryBackend for Historian {
    fn write(&mut self, series: &str, point: &DataPoint, sink: &mut LogSink) -> bool {
        Historian::write(self, series, point, sink)
    }

    fn first_timestamp(&mut self, series: &str, sink: &mut LogSink) -> Option<i64> {
        Historian::first_timestamp(self, series, sink)
    }

    fn last_timestamp(&mut self, series: &str, sink: &mut LogSink) -> Option<i64> {
        Historian::last_timestamp(self, series, sink)
    }

    fn has_timestamp(&mut self, series: &str, t: i64, sink: &mut LogSink) -> bool {
        Historian::has_timestamp(self, series, t, sink)
    }

    fn find_timestamp(
        &mut self,
        series: &str,
        t: i64,
        direction: SearchDirection,
        sink: &mut LogSink,
    ) -> Option<i64> {
        Historian::find_timestamp(self, series, t, direction, sink)
    }

    fn count_in_range(&mut self, series: &str, start: i64, end: Option<i64>, sink: &mut LogSink) -> Option<u64> {
        Historian::count_in_range(self, series, start, end, sink)
    }

    fn read_range(
        &mut self,
        series: &str,
        start: i64,
        offset: u64,
        limit: usize,
        sink: &mut LogSink,
    ) -> Option<Vec<DataPoint>> {
        Historian::read_range(self, series, start, offset, limit, sink)
    }

    fn write_event(&mut self, event_type: &str, emitters: &[&str], event: &EventPoint, sink: &mut LogSink) -> bool {
        Historian::write_event(self, event_type, emitters, event, sink)
    }

    fn event_types_of_emitter(&mut self, emitter: &str, sink: &mut LogSink) -> Option<Vec<String>> {
        Historian::event_types_of_emitter(self, emitter, sink)
    }

    fn find_event_timestamp(
        &mut self,
        emitter: &str,
        event_type: &str,
        t: i64,
        direction: SearchDirection,
        sink: &mut LogSink,
    ) -> Option<i64> {
        Historian::find_event_timestamp(self, emitter, event_type, t, direction, sink)
    }

    fn count_events(
        &mut self,
        emitter: &str,
        event_type: &str,
        start: i64,
        end: Option<i64>,
        sink: &mut LogSink,
    ) -> Option<u64> {
        Historian::count_events(self, emitter, event_type, start, end, sink)
    }

    fn read_events(
        &mut self,
        emitter: &str,
        event_type: &str,
        start: i64,
        offset: u64,
        limit: usize,
        fields: &[FieldSpec],
        sink: &mut LogSink,
    ) -> Option<Vec<EventPoint>> {
        Historian::read_events(self, emitter, event_type, start, offset, limit, fields, sink)
    }

    fn tick(&mut self) {
        Historian::tick(self)
    }
}
