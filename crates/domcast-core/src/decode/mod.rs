//! Consumer side: rebuild typed events from a wire payload
//!
//! ## Overview
//!
//! ```text
//! payload JSON ──► { e, a, p? } ──► Envelope ──► version check
//!                                                     │
//!                    a ++ p, stable sort by time ◄────┘
//!                                │
//!            ┌───────────┬───────┴────┬──────────┬─────────┐
//!            ▼           ▼            ▼          ▼         ▼
//!           dom         doc         region     metric     log      + summary
//! ```
//!
//! Decoding is all or nothing: malformed JSON, a malformed envelope, an
//! incompatible version, or an event array without `[time, eventType]` fails
//! the whole call. Event types this decoder has no reader for are skipped.

mod data;
mod layout;

use serde::Serialize;
use tracing::debug;

pub use data::{DocumentData, LogData, MetricData, RegionData, SummaryData};
pub use layout::DomData;

use crate::config::DecoderConfig;
use crate::error::{DecodeError, DecodeResult};
use crate::protocol::{check_version, Envelope, WirePayload};
use crate::types::{EventType, Token, TokenArray};
use layout::LayoutMap;

/// One decoded event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedEvent<T> {
    pub time: u64,
    pub event: EventType,
    pub data: T,
}

/// Everything decoded from one payload, each category sorted by time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedPayload {
    /// When the payload was decoded, Unix ms
    pub timestamp: i64,
    pub envelope: Envelope,
    pub dom: Vec<DecodedEvent<Vec<DomData>>>,
    pub doc: Vec<DecodedEvent<DocumentData>>,
    pub region: Vec<DecodedEvent<RegionData>>,
    pub metric: Vec<DecodedEvent<Vec<MetricData>>>,
    pub log: Vec<DecodedEvent<LogData>>,
    pub summary: Vec<DecodedEvent<SummaryData>>,
}

/// Decode a payload with the default decoder configuration.
pub fn decode(payload: &str) -> DecodeResult<DecodedPayload> {
    decode_with(payload, &DecoderConfig::default())
}

pub fn decode_with(payload: &str, config: &DecoderConfig) -> DecodeResult<DecodedPayload> {
    let wire: WirePayload = serde_json::from_str(payload)?;
    let envelope = Envelope::from_tokens(&wire.e)?;
    check_version(&envelope.version, &config.version, payload)?;

    let mut arrays: Vec<TokenArray> = wire.a;
    arrays.extend(wire.p.unwrap_or_default());

    let mut events = Vec::with_capacity(arrays.len());
    for (index, tokens) in arrays.into_iter().enumerate() {
        let (time, code) = header(&tokens).map_err(|reason| DecodeError::MalformedEvent {
            event: index,
            reason,
        })?;
        events.push((index, time, code, tokens));
    }
    events.sort_by_key(|(_, time, _, _)| *time);

    let mut decoded = DecodedPayload {
        timestamp: chrono::Utc::now().timestamp_millis(),
        envelope,
        dom: Vec::new(),
        doc: Vec::new(),
        region: Vec::new(),
        metric: Vec::new(),
        log: Vec::new(),
        summary: Vec::new(),
    };
    let mut layout = LayoutMap::new();
    let mut seen = Vec::with_capacity(events.len());

    for (index, time, code, tokens) in events {
        let Some(event) = u8::try_from(code).ok().and_then(EventType::from_code) else {
            debug!(code, "Skipping unknown event type");
            continue;
        };
        seen.push((time, event));

        let fields = &tokens[2..];
        let malformed = |reason: String| DecodeError::MalformedEvent {
            event: index,
            reason,
        };
        match event {
            EventType::Discover | EventType::Mutation | EventType::Snapshot => {
                let data = layout.decode(&tokens);
                decoded.dom.push(DecodedEvent { time, event, data });
            }
            EventType::Document => {
                let data = data::document(fields).map_err(malformed)?;
                decoded.doc.push(DecodedEvent { time, event, data });
            }
            EventType::Region => {
                let data = data::region(fields).map_err(malformed)?;
                decoded.region.push(DecodedEvent { time, event, data });
            }
            EventType::Metric => {
                let data = data::metric(fields).map_err(malformed)?;
                decoded.metric.push(DecodedEvent { time, event, data });
            }
            EventType::Log => {
                let data = data::log(fields).map_err(malformed)?;
                decoded.log.push(DecodedEvent { time, event, data });
            }
            other => debug!(event = %other, "No reader for event type"),
        }
    }

    let interval = config.summary_interval.as_millis() as u64;
    decoded.summary = data::summarize(&seen, interval)
        .into_iter()
        .filter_map(|data| {
            let time = data.spans.first()?[0];
            Some(DecodedEvent {
                time,
                event: EventType::Summary,
                data,
            })
        })
        .collect();
    decoded.summary.sort_by_key(|e| e.time);

    Ok(decoded)
}

/// `(time, eventType)` of an event array.
fn header(tokens: &[Token]) -> Result<(u64, i64), String> {
    if tokens.len() < 2 {
        return Err(format!("expected at least 2 tokens, found {}", tokens.len()));
    }
    let time = tokens[0]
        .as_number()
        .and_then(|t| u64::try_from(t).ok())
        .ok_or_else(|| "time is not a non-negative number".to_string())?;
    let code = tokens[1]
        .as_number()
        .ok_or_else(|| "event type is not a number".to_string())?;
    Ok((time, code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PROTOCOL_VERSION;

    fn payload(a: &str, p: Option<&str>) -> String {
        let e = format!(r#"[1,"{}","p1","u1","s1","1",0,0]"#, PROTOCOL_VERSION);
        match p {
            Some(p) => format!(r#"{{"e":{},"a":{},"p":{}}}"#, e, a, p),
            None => format!(r#"{{"e":{},"a":{}}}"#, e, a),
        }
    }

    #[test]
    fn test_document_event() {
        let decoded = decode(&payload("[[2,8,1982,3098]]", None)).unwrap();
        assert_eq!(decoded.doc.len(), 1);
        assert_eq!(decoded.doc[0].time, 2);
        assert_eq!(decoded.doc[0].event, EventType::Document);
        assert_eq!(decoded.doc[0].data, DocumentData { width: 1982, height: 3098 });
    }

    #[test]
    fn test_lanes_merged_in_time_order() {
        let decoded = decode(&payload(
            "[[30,8,1,1],[10,0,4,7]]",
            Some(r#"[[20,6,1,"HTML"],[5,5,1,"HTML"]]"#),
        ))
        .unwrap();
        assert_eq!(decoded.dom[0].time, 5);
        assert_eq!(decoded.dom[1].time, 20);
        assert_eq!(decoded.metric[0].data, vec![MetricData { key: 4, value: 7 }]);

        let order: Vec<u64> = decoded.summary.iter().map(|s| s.time).collect();
        assert_eq!(order, vec![5, 10, 20, 30]);
    }

    #[test]
    fn test_unknown_event_type_skipped() {
        let decoded = decode(&payload("[[1,99,5],[2,8,3,4]]", None)).unwrap();
        assert_eq!(decoded.doc.len(), 1);
    }

    #[test]
    fn test_short_array_fails() {
        let err = decode(&payload("[[1]]", None)).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedEvent { event: 0, .. }));
    }

    #[test]
    fn test_bad_document_fails() {
        let err = decode(&payload(r#"[[1,8,"wide",3]]"#, None)).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedEvent { .. }));
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(decode("{not json"), Err(DecodeError::Json(_))));
        assert!(matches!(decode(r#"{"a":[]}"#), Err(DecodeError::Json(_))));
    }

    #[test]
    fn test_summary_interval_from_config() {
        let config = DecoderConfig {
            summary_interval: std::time::Duration::from_millis(5),
            ..DecoderConfig::default()
        };
        let raw = payload("[[0,8,1,1],[4,8,1,2],[10,8,1,3]]", None);
        let decoded = decode_with(&raw, &config).unwrap();
        assert_eq!(decoded.summary[0].data.spans, vec![[0, 4], [10, 10]]);
    }

    #[test]
    fn test_oversized_mangled_text_is_kept_verbatim() {
        let decoded = decode(&payload(
            "[]",
            Some(r#"[[1,6,-3,2,"*T","zzzzzzzzzzzz"],[2,6,-4,2,"*T","5"]]"#),
        ))
        .unwrap();
        assert_eq!(decoded.dom[0].data[0].value.as_deref(), Some("zzzzzzzzzzzz"));
        assert_eq!(decoded.dom[1].data[0].value.as_deref(), Some("•••••"));
    }

    #[test]
    fn test_hostile_dom_fields_are_tolerated() {
        let decoded = decode(&payload(
            "[]",
            Some(r##"[[1,6,99999999999,-1,-2,"DIV~99999999999","#zz.","=x",[400]]]"##),
        ))
        .unwrap();
        assert!(decoded.dom[0].data.is_empty());

        let hostile = r##"[[1,6,7,-1,-2,"DIV~x","#.","=x",[400]]]"##;
        let decoded = decode(&payload("[]", Some(hostile))).unwrap();
        let node = &decoded.dom[0].data[0];
        assert_eq!(node.id, 7);
        assert_eq!(node.parent, None);
        assert_eq!(node.previous, None);
        assert_eq!(node.tag, "DIV~x");
        assert_eq!(node.width, None);
        assert!(node.attributes.is_empty());
    }
}
