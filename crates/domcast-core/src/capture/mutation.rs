//! Change record processing
//!
//! Each change record is first checked against the mutation history. A
//! throttled record is dropped here and resurfaces later in a replay batch;
//! everything else is applied to the shadow tree:
//!
//! ```text
//! ChildList      removed ──► remove (unless still attached)
//!                added   ──► depth-first add of the whole subtree
//! Attributes     target  ──► update
//! CharacterData  target  ──► update (text inside STYLE updates the STYLE)
//! ```

use std::collections::VecDeque;

use tracing::trace;

use super::extract::{process_node, process_subtree};
use super::host::{HostError, HostTree};
use super::metrics::MetricKey;
use super::state::CaptureState;
use super::throttle::ThrottleDecision;
use crate::types::{ChangeKind, ChangeRecord, HostNode, Source};

/// Change records delivered by one notification.
#[derive(Debug)]
pub(crate) struct PendingBatch {
    /// Arrival time, used as the timestamp of the encoded event
    pub time: u64,
    pub changes: VecDeque<PendingChange>,
}

#[derive(Debug)]
pub(crate) struct PendingChange {
    pub record: ChangeRecord,
    pub time: u64,
    /// Sequence number of the delivering batch
    pub batch: u64,
    /// Set for throttled records being replayed: the removals their
    /// signature deferred
    pub replay: Option<Vec<HostNode>>,
}

/// Apply one change record to the capture state.
pub(crate) fn process_change(
    state: &mut CaptureState,
    host: &dyn HostTree,
    change: PendingChange,
    now: u64,
) {
    let PendingChange {
        record,
        time,
        batch,
        replay,
    } = change;

    match replay {
        Some(removals) => {
            for node in removals {
                remove_node(state, host, node, time);
            }
        }
        None if record.kind != ChangeKind::CharacterData => {
            if let Some(key) = signature(state, host, &record) {
                let inactive = state.is_inactive(time);
                let check = state.history.check(&key, &record, batch, time, now, inactive);
                for node in check.replay_removals {
                    remove_node(state, host, node, time);
                }
                if check.decision == ThrottleDecision::Throttle {
                    trace!(signature = %key, "Mutation throttled");
                    state.metrics.count(MetricKey::ThrottledMutations, 1);
                    state.last_throttle = now;
                    return;
                }
            }
        }
        None => {}
    }

    apply(state, host, &record, time);
    state.metrics.count(MetricKey::Mutations, 1);
}

fn apply(state: &mut CaptureState, host: &dyn HostTree, record: &ChangeRecord, time: u64) {
    match record.kind {
        ChangeKind::ChildList => {
            for node in &record.removed {
                remove_node(state, host, *node, time);
            }
            let mut errors = Vec::new();
            for node in &record.added {
                process_subtree(&mut state.tree, host, *node, Source::ChildListAdd, &mut errors);
            }
            for error in errors {
                state.host_error(&error, time);
            }
            // Child text of a STYLE is folded into the STYLE value
            let is_style = state
                .tree
                .get_by_host(record.target)
                .is_some_and(|r| r.data.tag == "STYLE");
            if is_style {
                update(state, host, record.target, Source::CharacterData, time);
            }
        }
        ChangeKind::Attributes => update(state, host, record.target, Source::Attributes, time),
        ChangeKind::CharacterData => {
            update(state, host, record.target, Source::CharacterData, time)
        }
    }
}

fn update(
    state: &mut CaptureState,
    host: &dyn HostTree,
    node: HostNode,
    source: Source,
    time: u64,
) {
    if let Err(e) = process_node(&mut state.tree, host, node, source) {
        state.host_error(&e, time);
    }
}

/// Remove a node from the shadow tree unless the host still has it attached.
///
/// A removal can be processed after the node was re-inserted; the later
/// insertion then governs.
pub(crate) fn remove_node(
    state: &mut CaptureState,
    host: &dyn HostTree,
    node: HostNode,
    time: u64,
) {
    match is_attached(host, node) {
        Ok(true) => {}
        Ok(false) => {
            if let Err(e) = process_node(&mut state.tree, host, node, Source::ChildListRemove) {
                state.host_error(&e, time);
            }
        }
        Err(e) => state.host_error(&e, time),
    }
}

fn is_attached(host: &dyn HostTree, node: HostNode) -> Result<bool, HostError> {
    let root = host.root();
    let mut current = host.parent(node)?;
    while let Some(parent) = current {
        if parent == root {
            return Ok(true);
        }
        current = host.parent(parent)?;
    }
    Ok(false)
}

/// Throttle signature of a child-list or attribute change.
///
/// `None` when the target's parent is untracked or is `HTML`; such changes
/// are never throttled.
fn signature(state: &CaptureState, host: &dyn HostTree, record: &ChangeRecord) -> Option<String> {
    let target = state.tree.get_by_host(record.target);
    let parent = target
        .and_then(|t| t.parent)
        .and_then(|p| state.tree.get(p))
        .filter(|p| p.data.tag != "HTML")?;

    let element = match target {
        Some(t) if !t.selector.stable.is_empty() => {
            format!("{},{}", t.selector.stable, t.selector.compact)
        }
        _ => host.tag(record.target).unwrap_or_default(),
    };
    let names = |nodes: &[HostNode]| {
        nodes
            .iter()
            .map(|n| host.tag(*n).unwrap_or_default())
            .collect::<Vec<_>>()
            .join(" ")
    };

    Some(
        [
            format!("{},{}", parent.selector.stable, parent.selector.compact),
            element,
            record.attribute_name.clone().unwrap_or_default(),
            names(&record.added),
            names(&record.removed),
        ]
        .join(","),
    )
}
