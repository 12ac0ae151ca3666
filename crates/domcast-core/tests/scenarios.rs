//! End-to-end capture scenarios
//!
//! ## What These Tests Verify
//!
//! - Masking of sensitive form values on the wire
//! - Document size rounding and envelope layout
//! - Parent-before-child ordering of moved nodes
//! - Host failures surfacing as diagnostics
//! - Page navigation discarding stale work
//! - Pausing a session whose every task has to yield

use std::time::Duration;

use domcast_core::{
    decode, decode_with, CaptureConfig, CaptureSession, DecoderConfig, Envelope, EventType,
    HostNode, HostTree, MetricKey, PrivacyLevel, RegionInteraction, RegionVisibility, Token, UploadMode,
    VirtualDocument, WirePayload,
};

fn config() -> CaptureConfig {
    CaptureConfig::for_session("p1", "u1", "s1")
}

fn document() -> (VirtualDocument, HostNode) {
    let doc = VirtualDocument::new();
    let html = doc.create_element("HTML");
    let body = doc.create_element("BODY");
    doc.append_child(doc.root(), html);
    doc.append_child(html, body);
    doc.take_records();
    (doc, body)
}

fn wire(json: &str) -> WirePayload {
    serde_json::from_str(json).unwrap()
}

// ============================================================================
// Privacy
// ============================================================================

/// Test that a password value never reaches the wire in clear text.
#[tokio::test(start_paused = true)]
async fn test_password_value_is_masked() {
    let _ = tracing_subscriber::fmt::try_init();

    let (doc, body) = document();
    let input = doc.create_element("INPUT");
    doc.set_attribute(input, "type", "password");
    doc.set_attribute(input, "value", "p1ssw0rd");
    doc.append_child(body, input);
    let note = doc.create_element("P");
    let text = doc.create_text("Remember me");
    doc.append_child(note, text);
    doc.append_child(body, note);
    doc.take_records();

    let session = CaptureSession::new(config(), doc).unwrap();
    session.discover().completed().await;
    let json = session.flush(false).unwrap();
    assert!(!json.contains("p1ssw0rd"));

    let decoded = decode(&json).unwrap();
    let nodes = &decoded.dom[0].data;
    let field = nodes.iter().find(|n| n.tag == "INPUT").unwrap();
    assert_eq!(field.attributes.get("value").map(String::as_str), Some("••••••••"));
    assert_eq!(field.attributes.get("type").map(String::as_str), Some("password"));

    let label = nodes.iter().find(|n| n.tag == "*T").unwrap();
    assert_eq!(label.value.as_deref(), Some("Remember me"));
}

/// Test that a pinned privacy level mangles text, and that the decoder turns
/// it back into a placeholder of the same length.
#[tokio::test(start_paused = true)]
async fn test_pinned_privacy_mangles_text() {
    let (doc, body) = document();
    let card = doc.create_element("DIV");
    let text = doc.create_text("Jane Doe");
    doc.append_child(card, text);
    doc.append_child(body, card);
    doc.take_records();

    let session = CaptureSession::new(config(), doc).unwrap();
    session.set_privacy(card, PrivacyLevel::Exclude);
    session.discover().completed().await;

    let json = session.flush(false).unwrap();
    assert!(!json.contains("Jane"));
    let decoded = decode(&json).unwrap();
    let node = decoded.dom[0].data.iter().find(|n| n.tag == "*T").unwrap();
    let value = node.value.as_deref().unwrap();
    assert_eq!(value.chars().count(), 8);
    assert!(value.chars().all(|c| c == '•' || c == ' '));
}

// ============================================================================
// Wire layout
// ============================================================================

/// Test that the document size is rounded to whole pixels on the wire.
#[tokio::test(start_paused = true)]
async fn test_document_size_is_rounded() {
    let (doc, _) = document();
    doc.set_document_size(1982.2, 3097.6);
    let session = CaptureSession::new(config(), doc.clone()).unwrap();
    session.discover().completed().await;

    let json = session.flush(false).unwrap();
    let payload = wire(&json);
    let document = payload
        .a
        .iter()
        .find(|e| e[1] == Token::Number(EventType::Document.code() as i64))
        .unwrap();
    assert_eq!(&document[2..], &[Token::Number(1982), Token::Number(3098)]);

    // Unchanged size is not sent again
    session.encode(EventType::Document);
    let payload = wire(&session.flush(false).unwrap());
    assert!(payload.a.iter().all(|e| e[1] != Token::Number(8)));

    doc.set_document_size(1982.0, 4000.4);
    session.encode(EventType::Document);
    let decoded = decode(&session.flush(false).unwrap()).unwrap();
    assert_eq!(decoded.doc[0].data.height, 4000);
}

/// Test the positional envelope layout in both directions.
#[test]
fn test_envelope_layout() {
    let raw = r#"{"e":[1,"1.0.0","p1","u1","s1","pg1",0,0],"a":[[2,8,1982,3098]]}"#;
    let decoded = decode_with(raw, &DecoderConfig::with_version("1.0.0")).unwrap();
    let envelope = &decoded.envelope;
    assert_eq!(
        *envelope,
        Envelope {
            sequence: 1,
            version: "1.0.0".to_string(),
            project_id: "p1".to_string(),
            user_id: "u1".to_string(),
            session_id: "s1".to_string(),
            page_id: "pg1".to_string(),
            upload_mode: UploadMode::Async,
            is_final: false,
        }
    );
    assert_eq!(decoded.doc[0].time, 2);

    let tokens = serde_json::to_string(&envelope.to_tokens()).unwrap();
    assert_eq!(tokens, r#"[1,"1.0.0","p1","u1","s1","pg1",0,0]"#);
}

/// Test that every flush increments the sequence and the final one is sent
/// as a beacon.
#[tokio::test(start_paused = true)]
async fn test_sequence_and_final_flush() {
    let (doc, _) = document();
    let session = CaptureSession::new(config(), doc).unwrap();
    let sequences: Vec<u64> = (0..3)
        .map(|_| decode(&session.flush(false).unwrap()).unwrap().envelope.sequence)
        .collect();
    assert_eq!(sequences, vec![1, 2, 3]);

    let last = decode(&session.flush(true).unwrap()).unwrap();
    assert_eq!(last.envelope.sequence, 4);
    assert_eq!(last.envelope.upload_mode, UploadMode::Beacon);
    assert!(last.envelope.is_final);
    assert!(session.flush(false).is_err());
}

// ============================================================================
// Ordering
// ============================================================================

/// Test that a node moved under a freshly added parent is emitted after it.
#[tokio::test(start_paused = true)]
async fn test_moved_node_follows_new_parent() {
    let (doc, body) = document();
    let span = doc.create_element("SPAN");
    doc.append_child(body, span);
    doc.take_records();

    let session = CaptureSession::new(config(), doc.clone()).unwrap();
    session.discover().completed().await;
    session.flush(false).unwrap();

    let wrapper = doc.create_element("DIV");
    doc.append_child(body, wrapper);
    doc.append_child(wrapper, span);
    session.handle(doc.take_records()).completed().await;

    let decoded = decode(&session.flush(false).unwrap()).unwrap();
    let nodes = &decoded.dom[0].data;
    let wrapper_id = session.node_id(wrapper).unwrap().0;
    let span_id = session.node_id(span).unwrap().0;
    let position = |id: u32| nodes.iter().position(|n| n.id == id).unwrap();
    assert!(position(wrapper_id) < position(span_id));
    assert_eq!(nodes[position(span_id)].parent, Some(wrapper_id));
}

/// Test that analysis and playback arrays are merged back into time order.
#[test]
fn test_decoder_merges_lanes_by_time() {
    let raw = r#"{"e":[1,"1.0.0","p","u","s","1",0,0],
        "a":[[40,8,10,10],[5,0,4,2]],
        "p":[[30,6,3,2,"P~1"],[10,5,1,"HTML",2,1,"BODY"]]}"#;
    let decoded = decode_with(raw, &DecoderConfig::with_version("1.0.1")).unwrap();
    let times: Vec<u64> = decoded.dom.iter().map(|e| e.time).collect();
    assert_eq!(times, vec![10, 30]);
    assert_eq!(decoded.dom[1].data[0].selector.stable, "HTML>BODY>P:nth-of-type(1)");
}

// ============================================================================
// Diagnostics and regions
// ============================================================================

/// Test that a node the host refuses to read is skipped and reported once.
#[tokio::test(start_paused = true)]
async fn test_host_failure_reported_once() {
    let (doc, body) = document();
    let frame = doc.create_element("IFRAME");
    let after = doc.create_element("SECTION");
    doc.append_child(body, frame);
    doc.append_child(body, after);
    doc.deny_access(frame);
    doc.take_records();

    let session = CaptureSession::new(config(), doc.clone()).unwrap();
    session.discover().completed().await;
    assert!(session.node_id(frame).is_none());
    assert!(session.node_id(after).is_some());

    // Same failure again through a mutation
    doc.set_attribute(frame, "src", "https://other.example");
    session.handle(doc.take_records()).completed().await;
    assert!(session.metric(MetricKey::HostErrors) >= 2);

    let decoded = decode(&session.flush(false).unwrap()).unwrap();
    assert_eq!(decoded.log.len(), 1);
    assert_eq!(decoded.log[0].data.code, 2);
    assert!(!decoded.log[0].data.message.is_empty());
}

/// Test that region roots are tracked and their state is reported.
#[tokio::test(start_paused = true)]
async fn test_region_updates() {
    let (doc, body) = document();
    let hero = doc.create_element("DIV");
    doc.set_attribute(hero, "data-region", "hero");
    doc.append_child(body, hero);
    doc.take_records();

    let session = CaptureSession::new(config(), doc).unwrap();
    session.discover().completed().await;
    let id = session.node_id(hero).unwrap();

    let decoded = decode(&session.flush(false).unwrap()).unwrap();
    assert_eq!(decoded.region.len(), 1);
    assert_eq!(decoded.region[0].data.name, "hero");
    assert_eq!(decoded.region[0].data.id, id.as_token());

    assert!(session.update_region(id, RegionVisibility::Visible, RegionInteraction::Clicked));
    session.encode(EventType::Region);
    let decoded = decode(&session.flush(false).unwrap()).unwrap();
    assert_eq!(decoded.region[0].data.visibility, 10);
    assert_eq!(decoded.region[0].data.interaction, 20);
}

// ============================================================================
// Task lifecycle
// ============================================================================

/// Test that navigating away discards queued work of the old page.
#[tokio::test(start_paused = true)]
async fn test_navigate_discards_queued_discover() {
    let (doc, _) = document();
    let session = CaptureSession::new(config(), doc.clone()).unwrap();

    let stale = session.discover();
    assert_eq!(session.navigate(), 2);
    assert!(!stale.completed().await);
    session.settle().await;

    assert!(session.records().is_empty());
    let decoded = decode(&session.flush(false).unwrap()).unwrap();
    assert_eq!(decoded.envelope.page_id, "2");
    assert!(decoded.dom.is_empty());

    assert!(session.discover().completed().await);
    assert_eq!(session.records().len(), 2);
}

/// Test that a session whose budget forces a yield before every node makes
/// no progress while paused and finishes after resuming.
#[tokio::test(start_paused = true)]
async fn test_pause_holds_yielding_tasks() {
    let (doc, body) = document();
    for _ in 0..5 {
        let item = doc.create_element("P");
        doc.append_child(body, item);
    }
    doc.take_records();

    let config = CaptureConfig {
        long_task_budget: Duration::ZERO,
        ..config()
    };
    let session = CaptureSession::new(config, doc).unwrap();
    session.pause();
    let completion = session.discover();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(session.records().is_empty());

    session.resume();
    assert!(completion.completed().await);
    assert_eq!(session.records().len(), 7);
    assert_eq!(session.metric(MetricKey::InvokeCount), 1);
}
