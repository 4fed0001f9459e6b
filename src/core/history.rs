//! History node memory.
//!
//! When a state with history children is exited, the configuration below it
//! is recorded so a later transition to the history node can restore it.
//! Like the rest of the snapshot, history is immutable: recording returns a
//! new value.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Recorded configurations keyed by history node id.
///
/// Entries hold the ids of the nodes to restore: the active atomic
/// descendants for deep history, the active direct children for shallow.
///
/// # Example
///
/// ```rust
/// use statecraft::core::HistoryValue;
///
/// let history = HistoryValue::new();
/// let updated = history.record("player.hist", vec!["player.playing".to_string()]);
///
/// assert!(history.get("player.hist").is_none());
/// assert_eq!(updated.get("player.hist").map(|ids| ids.len()), Some(1));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryValue {
    entries: BTreeMap<String, Vec<String>>,
}

impl HistoryValue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a new history with `history_id` set to `state_ids`.
    pub fn record(&self, history_id: impl Into<String>, state_ids: Vec<String>) -> Self {
        let mut entries = self.entries.clone();
        entries.insert(history_id.into(), state_ids);
        Self { entries }
    }

    pub fn get(&self, history_id: &str) -> Option<&[String]> {
        self.entries.get(history_id).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(id, states)| (id.as_str(), states.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_history_is_empty() {
        assert!(HistoryValue::new().is_empty());
    }

    #[test]
    fn record_is_pure() {
        let history = HistoryValue::new();
        let updated = history.record("h", vec!["a".into()]);

        assert!(history.is_empty());
        assert_eq!(updated.get("h"), Some(&["a".to_string()][..]));
    }

    #[test]
    fn record_replaces_previous_entry() {
        let history = HistoryValue::new()
            .record("h", vec!["a".into()])
            .record("h", vec!["b".into(), "c".into()]);

        assert_eq!(history.get("h").map(<[String]>::len), Some(2));
        assert_eq!(history.iter().count(), 1);
    }

    #[test]
    fn history_serializes_as_map() {
        let history = HistoryValue::new().record("m.h", vec!["m.a".into()]);
        let json = serde_json::to_value(&history).unwrap();

        assert_eq!(json, serde_json::json!({"m.h": ["m.a"]}));
    }
}
