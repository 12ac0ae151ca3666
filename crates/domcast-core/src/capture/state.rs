//! Per-page capture state
//!
//! Everything a page context owns lives in one [`CaptureState`]: the shadow
//! tree, the mutation history, the pending batches and the outgoing queue.
//! Navigation replaces the whole value, so nothing from the previous page can
//! leak into the next one.

use std::collections::VecDeque;

use tracing::{debug, info};

use super::diagnostics::{Diagnostics, LogCode, Severity};
use super::encoder::encode_dom;
use super::host::{HostError, HostTree};
use super::metrics::{MetricKey, Metrics};
use super::mutation::{self, PendingBatch, PendingChange};
use super::queue::EventQueue;
use super::region::{DocumentTracker, RegionTracker};
use super::shadow::ShadowTree;
use super::throttle::MutationHistory;
use crate::config::CaptureConfig;
use crate::types::{EventType, MutationBatch};

const REGION_ATTRIBUTE: &str = "data-region";

pub(crate) struct CaptureState {
    pub config: CaptureConfig,
    /// Page context, starting at 1
    pub page: u64,
    /// Last payload sequence number of this page
    pub sequence: u64,
    /// Last batch number handed out
    pub batch_seq: u64,
    pub tree: ShadowTree,
    pub regions: RegionTracker,
    pub document: DocumentTracker,
    pub queue: EventQueue,
    pub diagnostics: Diagnostics,
    pub metrics: Metrics,
    pub history: MutationHistory,
    pub mutations: VecDeque<PendingBatch>,
    /// End of the active interaction window
    pub interaction_until: Option<u64>,
    /// A throttle flush task is waiting
    pub flush_scheduled: bool,
    /// Time of the most recent throttled change
    pub last_throttle: u64,
}

impl CaptureState {
    pub fn new(config: &CaptureConfig, page: u64) -> Self {
        Self {
            config: config.clone(),
            page,
            sequence: 0,
            batch_seq: 0,
            tree: ShadowTree::new(config.default_privacy, config.mask_rules.clone()),
            regions: RegionTracker::new(),
            document: DocumentTracker::new(),
            queue: EventQueue::new(config.lean),
            diagnostics: Diagnostics::new(config.diagnostic_repeat_limit),
            metrics: Metrics::new(),
            history: MutationHistory::new(
                config.throttle_threshold,
                config.interaction_window,
                config.history_quiet_period,
                config.history_capacity,
            ),
            mutations: VecDeque::new(),
            interaction_until: None,
            flush_scheduled: false,
            last_throttle: 0,
        }
    }

    /// Start the next page context. Returns the new page id.
    pub fn reset(&mut self) -> u64 {
        let page = self.page + 1;
        info!(from = self.page, to = page, "Starting new page context");
        *self = Self::new(&self.config, page);
        page
    }

    /// Queue a delivered batch of change records.
    pub fn push_batch(&mut self, batch: MutationBatch) {
        if batch.is_empty() {
            return;
        }
        self.batch_seq += 1;
        let seq = self.batch_seq;
        let time = batch.time;
        self.mutations.push_back(PendingBatch {
            time,
            changes: batch
                .changes
                .into_iter()
                .map(|record| PendingChange {
                    record,
                    time,
                    batch: seq,
                    replay: None,
                })
                .collect(),
        });
    }

    /// Move throttled changes into a replay batch.
    pub fn push_replay(&mut self, now: u64) -> usize {
        let throttled = self.history.take_throttled();
        if throttled.is_empty() {
            return 0;
        }
        self.batch_seq += 1;
        let seq = self.batch_seq;
        let count = throttled.len();
        debug!(count, "Replaying throttled mutations");
        self.mutations.push_back(PendingBatch {
            time: now,
            changes: throttled
                .into_iter()
                .map(|t| PendingChange {
                    record: t.record,
                    time: t.time,
                    batch: seq,
                    replay: Some(t.removals),
                })
                .collect(),
        });
        count
    }

    /// Process one pending change record. Returns `false` when nothing is left.
    ///
    /// A batch is encoded as one `Mutation` event once its last record was
    /// processed.
    pub fn step_mutation(&mut self, host: &dyn HostTree, now: u64) -> bool {
        let Some(batch) = self.mutations.front_mut() else {
            return false;
        };
        match batch.changes.pop_front() {
            Some(change) => {
                mutation::process_change(self, host, change, now);
            }
            None => {
                let time = batch.time;
                self.mutations.pop_front();
                self.evict_history(host, now);
                self.encode(EventType::Mutation, time, host);
            }
        }
        true
    }

    /// Whether the interaction window is closed at `time`.
    pub fn is_inactive(&self, time: u64) -> bool {
        self.interaction_until.map_or(true, |until| time > until)
    }

    pub fn mark_interaction(&mut self, now: u64) {
        let until = now + self.config.interaction_window.as_millis() as u64;
        self.interaction_until = Some(self.interaction_until.map_or(until, |u| u.max(until)));
    }

    /// Report a host failure through the diagnostic channel.
    pub fn host_error(&mut self, error: &HostError, time: u64) {
        self.metrics.count(MetricKey::HostErrors, 1);
        let message = error.to_string();
        let logged = self
            .diagnostics
            .log(time, LogCode::HostAccess, Severity::Warning, "", &message);
        if let Some(tokens) = logged {
            self.queue.push(EventType::Log, tokens);
        }
    }

    /// Report a capture task that died mid-run.
    pub fn task_error(&mut self, task: &str, reason: &str, time: u64) {
        self.metrics.count(MetricKey::TaskErrors, 1);
        let logged = self
            .diagnostics
            .log(time, LogCode::RunTask, Severity::Error, task, reason);
        if let Some(tokens) = logged {
            self.queue.push(EventType::Log, tokens);
        }
    }

    /// Append the arrays for one event type to the outgoing queue.
    pub fn encode(&mut self, event: EventType, time: u64, host: &dyn HostTree) {
        match event {
            EventType::Discover | EventType::Mutation | EventType::Snapshot => {
                let ids = self.tree.updates();
                for id in &ids {
                    let Some(record) = self.tree.get(*id) else {
                        continue;
                    };
                    if record.metadata.active && record.metadata.region_root {
                        if let Some(name) = record.data.attributes.get(REGION_ATTRIBUTE) {
                            let name = name.clone();
                            self.regions.track(*id, &name);
                        }
                    }
                }
                if let Some(tokens) = encode_dom(&self.tree, &ids, event, time) {
                    self.queue.push(event, tokens);
                }
            }
            EventType::Region => {
                for tokens in self.regions.encode(time) {
                    self.queue.push(event, tokens);
                }
            }
            EventType::Document => match host.document_size() {
                Ok(size) => {
                    if let Some(tokens) = self.document.encode(time, size) {
                        self.queue.push(event, tokens);
                    }
                }
                Err(e) => self.host_error(&e, time),
            },
            EventType::Metric => {
                if let Some(tokens) = self.metrics.encode(time) {
                    self.queue.push(event, tokens);
                }
            }
            other => debug!(event = %other, "No capture state to encode"),
        }
    }

    fn evict_history(&mut self, host: &dyn HostTree, now: u64) {
        let eviction = self.history.evict(now);
        if eviction.wiped {
            self.metrics.count(MetricKey::HistoryClear, 1);
        }
        for node in eviction.removals {
            mutation::remove_node(self, host, node, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::extract::process_node;
    use crate::capture::VirtualDocument;
    use crate::types::{ChangeRecord, HostNode, PrivacyLevel, Source, Token};

    fn config() -> CaptureConfig {
        CaptureConfig {
            default_privacy: PrivacyLevel::None,
            ..CaptureConfig::for_session("p", "u", "s")
        }
    }

    #[test]
    fn test_reset_advances_page_and_clears() {
        let mut state = CaptureState::new(&config(), 1);
        state.sequence = 4;
        state.metrics.count(MetricKey::Mutations, 1);
        state.push_batch(MutationBatch::new(1, vec![ChangeRecord::character_data(HostNode(3))]));

        assert_eq!(state.reset(), 2);
        assert_eq!(state.page, 2);
        assert_eq!(state.sequence, 0);
        assert!(state.mutations.is_empty());
        assert_eq!(state.metrics.get(MetricKey::Mutations), 0);
    }

    #[test]
    fn test_interaction_window() {
        let mut state = CaptureState::new(&config(), 1);
        assert!(state.is_inactive(0));
        state.mark_interaction(1000);
        assert!(!state.is_inactive(4000));
        assert!(state.is_inactive(4001));

        // An earlier mark never shortens the window
        state.mark_interaction(500);
        assert!(!state.is_inactive(4000));
    }

    #[test]
    fn test_host_error_goes_to_log_lane() {
        let mut state = CaptureState::new(&config(), 1);
        let error = HostError::AccessDenied("frame".to_string());
        state.host_error(&error, 7);
        state.host_error(&error, 8);

        let (analysis, _) = state.queue.drain();
        assert_eq!(analysis.len(), 1);
        assert_eq!(analysis[0][1], Token::Number(33));
        assert_eq!(state.metrics.get(MetricKey::HostErrors), 2);
    }

    #[test]
    fn test_step_encodes_each_batch() {
        let doc = VirtualDocument::new();
        let html = doc.create_element("HTML");
        doc.append_child(doc.root(), html);
        doc.take_records();

        let mut state = CaptureState::new(&config(), 1);
        process_node(&mut state.tree, &doc, html, Source::Discover).unwrap();
        state.tree.updates();

        let body = doc.create_element("BODY");
        doc.append_child(html, body);
        state.push_batch(doc.take_records_at(10));
        doc.set_attribute(body, "class", "x");
        state.push_batch(doc.take_records_at(20));

        while state.step_mutation(&doc, 20) {}
        let (_, playback) = state.queue.drain();
        assert_eq!(playback.len(), 2);
        assert_eq!(playback[0][0], Token::Number(10));
        assert_eq!(playback[1][0], Token::Number(20));
    }
}
