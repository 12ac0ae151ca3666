//! Capture cost counters
//!
//! Counters accumulate for the lifetime of a page and are emitted as one
//! `Metric` array holding every counter changed since the previous emit:
//!
//! ```text
//! [time, 0, key, value, key, value, ...]
//! ```

use indexmap::{IndexMap, IndexSet};

use crate::types::{EventType, Token, TokenArray};

/// Wire keys of the capture counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetricKey {
    /// Time spent discovering, ms
    LayoutCost = 3,
    /// Time spent in all capture tasks, ms
    TotalCost = 4,
    /// Number of tasks run
    InvokeCount = 5,
    /// Change records processed
    Mutations = 20,
    /// Change records skipped by throttling
    ThrottledMutations = 21,
    /// Times the mutation history was wiped
    HistoryClear = 22,
    /// Host API failures
    HostErrors = 23,
    /// Capture tasks that died mid-run
    TaskErrors = 24,
}

#[derive(Debug, Default)]
pub struct Metrics {
    values: IndexMap<MetricKey, i64>,
    dirty: IndexSet<MetricKey>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&mut self, key: MetricKey, delta: i64) {
        if delta == 0 {
            return;
        }
        *self.values.entry(key).or_insert(0) += delta;
        self.dirty.insert(key);
    }

    pub fn get(&self, key: MetricKey) -> i64 {
        self.values.get(&key).copied().unwrap_or(0)
    }

    /// Emit changed counters, or `None` when nothing changed.
    pub fn encode(&mut self, time: u64) -> Option<TokenArray> {
        if self.dirty.is_empty() {
            return None;
        }
        let mut keys: Vec<MetricKey> = self.dirty.drain(..).collect();
        keys.sort();

        let mut tokens = vec![Token::from(time), Token::from(EventType::Metric.code())];
        for key in keys {
            tokens.push(Token::Number(key as i64));
            tokens.push(Token::Number(self.get(key)));
        }
        Some(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_only_changed() {
        let mut metrics = Metrics::new();
        assert!(metrics.encode(0).is_none());

        metrics.count(MetricKey::Mutations, 3);
        metrics.count(MetricKey::InvokeCount, 1);
        let tokens = metrics.encode(10).unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Number(10),
                Token::Number(0),
                Token::Number(5),
                Token::Number(1),
                Token::Number(20),
                Token::Number(3),
            ]
        );

        metrics.count(MetricKey::Mutations, 2);
        let tokens = metrics.encode(20).unwrap();
        assert_eq!(&tokens[2..], &[Token::Number(20), Token::Number(5)]);
        assert!(metrics.encode(30).is_none());
    }

    #[test]
    fn test_zero_delta_is_ignored() {
        let mut metrics = Metrics::new();
        metrics.count(MetricKey::HostErrors, 0);
        assert!(metrics.encode(0).is_none());
    }
}
