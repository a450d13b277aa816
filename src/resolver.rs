use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::StreamData;
use crate::value::{Record, Value};

/// Produces the next raw record for a stream and the updated cursor.
///
/// Array streams are indexed by the cursor, which wraps around the stream
/// length and only advances when auto-cycle is enabled. Object streams
/// always return the stored record with a wall-clock `timestamp` and a
/// 1-based `updateIndex` injected, and their cursor always advances.
pub fn resolve(data: &StreamData, cursor: usize, auto_cycle: bool) -> (Record, usize) {
    match data {
        StreamData::Array(records) => {
            if records.is_empty() {
                return (Record::new(), cursor);
            }

            let index = cursor % records.len();
            let record = records[index].clone();

            let next = if auto_cycle {
                (index + 1) % records.len()
            } else {
                cursor
            };

            (record, next)
        }
        StreamData::Object(record) => {
            let mut record = record.clone();
            record.insert("timestamp".to_string(), Value::Float(epoch_seconds()));
            record.insert(
                "updateIndex".to_string(),
                Value::Integer(cursor as i64 + 1),
            );

            (record, cursor + 1)
        }
    }
}

pub(crate) fn epoch_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn array_stream(values: &[i64]) -> StreamData {
        StreamData::Array(
            values
                .iter()
                .map(|v| {
                    let mut record = Record::new();
                    record.insert("v".to_string(), Value::Integer(*v));
                    record
                })
                .collect(),
        )
    }

    #[test]
    fn array_stream_wraps_around() {
        let stream = array_stream(&[10, 20, 30]);

        let mut cursor = 0;
        let mut seen = Vec::new();
        for _ in 0..4 {
            let (record, next) = resolve(&stream, cursor, true);
            seen.push(record["v"].as_integer().unwrap());
            cursor = next;
        }

        // Call 1 and call N+1 return the same record.
        assert_eq!(seen, vec![10, 20, 30, 10]);
    }

    #[test]
    fn cursor_is_frozen_without_auto_cycle() {
        let stream = array_stream(&[10, 20]);

        let mut cursor = 0;
        for _ in 0..5 {
            let (record, next) = resolve(&stream, cursor, false);
            assert_eq!(record["v"].as_integer(), Some(10));
            cursor = next;
        }
        assert_eq!(cursor, 0);
    }

    #[test]
    fn empty_array_yields_empty_record() {
        let stream = StreamData::Array(Vec::new());
        let (record, cursor) = resolve(&stream, 0, true);
        assert!(record.is_empty());
        assert_eq!(cursor, 0);
    }

    #[test]
    fn object_stream_injects_timestamp_and_update_index() {
        let mut stored = Record::new();
        stored.insert("level".to_string(), Value::Integer(87));
        let stream = StreamData::Object(stored);

        let (first, cursor) = resolve(&stream, 0, true);
        assert_eq!(first["level"].as_integer(), Some(87));
        assert_eq!(first["updateIndex"].as_integer(), Some(1));
        assert!(first["timestamp"].as_float().unwrap() > 0.0);
        assert_eq!(cursor, 1);

        let (second, cursor) = resolve(&stream, cursor, false);
        assert_eq!(second["updateIndex"].as_integer(), Some(2));
        assert_eq!(cursor, 2);
    }
}
