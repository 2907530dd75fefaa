//! # Batch Splitter
//!
//! Cuts a drained reading list into request-sized chunks and builds the
//! JSON body for one chunk.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::reading::Reading;

/// Request body sent to the endpoint for one batch.
///
/// `additionalParams` is always present and serializes as `null` when no
/// extras are configured.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchPayload<'a> {
    pub location_data: &'a [Reading],
    pub additional_params: Option<&'a Map<String, Value>>,
}

impl<'a> BatchPayload<'a> {
    pub fn new(readings: &'a [Reading], extras: Option<&'a Map<String, Value>>) -> Self {
        Self {
            location_data: readings,
            additional_params: extras,
        }
    }

    /// Serialize to the wire body
    pub fn to_body(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Split `readings` into consecutive chunks of at most `batch_size`.
///
/// Order is preserved and every chunk is non-empty. A `batch_size` of 0 is
/// treated as 1; configuration validation rejects it before it gets here.
///
/// # Examples
///
/// ```
/// use location_uplink::batch::split_batches;
///
/// let sizes: Vec<usize> = split_batches((0..250).collect::<Vec<u32>>(), 100)
///     .iter()
///     .map(Vec::len)
///     .collect();
/// assert_eq!(sizes, vec![100, 100, 50]);
/// ```
pub fn split_batches<T>(readings: Vec<T>, batch_size: usize) -> Vec<Vec<T>> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::with_capacity(readings.len().div_ceil(batch_size));
    let mut iter = readings.into_iter().peekable();

    while iter.peek().is_some() {
        batches.push(iter.by_ref().take(batch_size).collect());
    }

    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_split_250_by_100() {
        let batches = split_batches((0..250).collect::<Vec<u32>>(), 100);
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
        assert_eq!(batches[1][0], 100);
        assert_eq!(batches[2][49], 249);
    }

    #[test]
    fn test_split_chunk_count_and_order() {
        for (n, b) in [(0usize, 10usize), (1, 10), (10, 10), (11, 10), (99, 7), (1000, 100)] {
            let input: Vec<usize> = (0..n).collect();
            let batches = split_batches(input.clone(), b);

            assert_eq!(batches.len(), n.div_ceil(b), "n={} b={}", n, b);
            if let Some((last, full)) = batches.split_last() {
                assert!(full.iter().all(|c| c.len() == b));
                assert!(!last.is_empty() && last.len() <= b);
            }
            assert_eq!(batches.concat(), input);
        }
    }

    #[test]
    fn test_split_zero_batch_size_is_treated_as_one() {
        let batches = split_batches(vec![1, 2, 3], 0);
        assert_eq!(batches, vec![vec![1], vec![2], vec![3]]);
    }

    #[test]
    fn test_payload_without_extras_has_null_params() {
        let at = Utc.with_ymd_and_hms(2025, 6, 29, 10, 30, 0).unwrap();
        let readings = vec![Reading::new(1.5, 2.5, 3.0, at)];
        let body = BatchPayload::new(&readings, None).to_body().unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();

        assert!(json["additionalParams"].is_null());
        assert!(json.as_object().unwrap().contains_key("additionalParams"));
        assert_eq!(json["locationData"].as_array().unwrap().len(), 1);
        assert_eq!(json["locationData"][0]["latitude"], 1.5);
        assert_eq!(json["locationData"][0]["timestamp"], "2025-06-29T10:30:00.000Z");
    }

    #[test]
    fn test_payload_with_extras() {
        let at = Utc.with_ymd_and_hms(2025, 6, 29, 10, 30, 0).unwrap();
        let readings = vec![Reading::new(1.0, 2.0, 3.0, at), Reading::new(4.0, 5.0, 6.0, at)];
        let mut extras = Map::new();
        extras.insert("deviceId".to_string(), Value::from("abc-123"));

        let body = BatchPayload::new(&readings, Some(&extras)).to_body().unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(json["additionalParams"]["deviceId"], "abc-123");
        assert_eq!(json["locationData"][1]["longitude"], 5.0);
    }
}
