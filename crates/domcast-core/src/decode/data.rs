//! Decoding of analysis event arrays

use indexmap::IndexMap;
use serde::Serialize;

use crate::types::{EventType, Token};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DocumentData {
    pub width: i64,
    pub height: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegionData {
    pub id: i64,
    pub interaction: i64,
    pub visibility: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricData {
    pub key: i64,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogData {
    pub code: i64,
    pub severity: i64,
    pub name: String,
    pub message: String,
}

/// Time spans during which events of one type kept arriving.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryData {
    pub event: EventType,
    /// `[start, end]` pairs in time order
    pub spans: Vec<[u64; 2]>,
}

fn number(fields: &[Token], index: usize, name: &str) -> Result<i64, String> {
    fields
        .get(index)
        .and_then(Token::as_number)
        .ok_or_else(|| format!("{} is missing or not a number", name))
}

fn text(fields: &[Token], index: usize, name: &str) -> Result<String, String> {
    fields
        .get(index)
        .and_then(Token::as_text)
        .map(str::to_string)
        .ok_or_else(|| format!("{} is missing or not a string", name))
}

/// `fields` are the tokens after `[time, event]`.
pub(crate) fn document(fields: &[Token]) -> Result<DocumentData, String> {
    Ok(DocumentData {
        width: number(fields, 0, "width")?,
        height: number(fields, 1, "height")?,
    })
}

pub(crate) fn region(fields: &[Token]) -> Result<RegionData, String> {
    Ok(RegionData {
        id: number(fields, 0, "id")?,
        interaction: number(fields, 1, "interaction")?,
        visibility: number(fields, 2, "visibility")?,
        name: text(fields, 3, "name")?,
    })
}

pub(crate) fn metric(fields: &[Token]) -> Result<Vec<MetricData>, String> {
    if fields.len() % 2 != 0 {
        return Err("metric fields are not key/value pairs".to_string());
    }
    fields
        .chunks(2)
        .enumerate()
        .map(|(i, pair)| {
            Ok(MetricData {
                key: number(pair, 0, &format!("key {}", i))?,
                value: number(pair, 1, &format!("value {}", i))?,
            })
        })
        .collect()
}

pub(crate) fn log(fields: &[Token]) -> Result<LogData, String> {
    Ok(LogData {
        code: number(fields, 0, "code")?,
        severity: number(fields, 1, "severity")?,
        name: text(fields, 2, "name")?,
        message: text(fields, 3, "message")?,
    })
}

/// Coalesce event times into spans per event type.
///
/// `events` must be sorted by time. An event less than `interval` ms after
/// the end of the current span of its type extends that span.
pub(crate) fn summarize(events: &[(u64, EventType)], interval: u64) -> Vec<SummaryData> {
    let mut spans: IndexMap<EventType, Vec<[u64; 2]>> = IndexMap::new();
    for &(time, event) in events {
        let list = spans.entry(event).or_default();
        match list.last_mut() {
            Some(span) if time.saturating_sub(span[1]) < interval => span[1] = time,
            _ => list.push([time, time]),
        }
    }
    spans
        .into_iter()
        .map(|(event, spans)| SummaryData { event, spans })
        .collect()
}
