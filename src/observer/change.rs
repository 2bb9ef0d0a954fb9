//! Change detection: diffing an observer's last reported view against its new view.
//!
//! Views are ordered sequences of [`CookieListItem`]. The diff keeps a longest
//! common subsequence of the two views in place and reports everything else:
//!
//! - `Hidden` events carry the index of the item in the **old** view,
//! - `Visible` events carry the index of the item in the **new** view.
//!
//! A consumer replays a batch by removing hidden items in descending index
//! order and then inserting visible items in ascending index order
//! ([`apply_changes`]). Events are emitted in exactly that order.

use crate::cookies::CookieListItem;
use crate::errors::CookieError;
use crate::observer::ObserverId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// The record entered the observer's view
    Visible,
    /// The record left the observer's view
    Hidden,
}

/// A single appearance or disappearance in an observer's view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieChange {
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub name: String,
    pub value: String,
    pub index: usize,
}

impl CookieChange {
    pub fn item(&self) -> CookieListItem {
        CookieListItem {
            name: self.name.clone(),
            value: self.value.clone(),
        }
    }

    fn new(change_type: ChangeType, item: &CookieListItem, index: usize) -> Self {
        Self {
            change_type,
            name: item.name.clone(),
            value: item.value.clone(),
            index,
        }
    }
}

/// What an observer callback receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeBatch {
    /// Observer the batch is delivered to
    pub observer: ObserverId,
    /// Ordered changes: hidden (descending index) first, then visible (ascending index)
    pub changes: Vec<CookieChange>,
    /// The observer's full view after this batch
    pub all: Vec<CookieListItem>,
}

/// Computes the minimal ordered changes turning `old` into `new`.
pub fn diff_views(old: &[CookieListItem], new: &[CookieListItem]) -> Vec<CookieChange> {
    let n = old.len();
    let m = new.len();

    // lcs[i][j] = length of the LCS of old[i..] and new[j..]
    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if old[i] == new[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut hidden = Vec::new();
    let mut visible = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old[i] == new[j] {
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            hidden.push(CookieChange::new(ChangeType::Hidden, &old[i], i));
            i += 1;
        } else {
            visible.push(CookieChange::new(ChangeType::Visible, &new[j], j));
            j += 1;
        }
    }
    hidden.extend((i..n).map(|k| CookieChange::new(ChangeType::Hidden, &old[k], k)));
    visible.extend((j..m).map(|k| CookieChange::new(ChangeType::Visible, &new[k], k)));

    hidden.reverse();
    hidden.extend(visible);
    hidden
}

/// Replays `changes` on `view`, the way a consumer reconstructing the sequence does.
///
/// Fails with a consistency error when a hidden event does not name the item found at its
/// index, or when an index falls outside the sequence.
pub fn apply_changes(
    view: &[CookieListItem],
    changes: &[CookieChange],
) -> Result<Vec<CookieListItem>, CookieError> {
    let mut deletions = Vec::new();
    let mut insertions = Vec::new();

    for change in changes {
        match change.change_type {
            ChangeType::Hidden => {
                let item = change.item();
                if view.get(change.index) != Some(&item) {
                    return Err(CookieError::Consistency(format!(
                        "hidden cookie {:?} at index {} does not match the observed view (found {:?})",
                        item.name,
                        change.index,
                        view.get(change.index).map(|i| &i.name)
                    )));
                }
                deletions.push(change.index);
            }
            ChangeType::Visible => insertions.push((change.index, change.item())),
        }
    }

    deletions.sort_unstable_by(|a, b| b.cmp(a));
    if deletions.windows(2).any(|w| w[0] == w[1]) {
        return Err(CookieError::Consistency("duplicate hidden index in batch".to_string()));
    }

    let mut next = view.to_vec();
    for index in deletions {
        next.remove(index);
    }

    insertions.sort_by_key(|(index, _)| *index);
    for (index, item) in insertions {
        if index > next.len() {
            return Err(CookieError::Consistency(format!(
                "visible cookie {:?} at index {} is past the end of the observed view ({} items)",
                item.name,
                index,
                next.len()
            )));
        }
        next.insert(index, item);
    }

    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(pairs: &[(&str, &str)]) -> Vec<CookieListItem> {
        pairs.iter().map(|(n, v)| CookieListItem::new(n, v)).collect()
    }

    fn roundtrip(old: &[CookieListItem], new: &[CookieListItem]) -> Vec<CookieChange> {
        let changes = diff_views(old, new);
        assert_eq!(apply_changes(old, &changes).unwrap(), new);
        changes
    }

    #[test]
    fn identical_views_produce_no_changes() {
        let v = items(&[("A", "1"), ("B", "2")]);
        assert!(diff_views(&v, &v).is_empty());
    }

    #[test]
    fn initial_snapshot_is_all_visible() {
        let new = items(&[("A", "1"), ("B", "2")]);
        let changes = roundtrip(&[], &new);
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.change_type == ChangeType::Visible));
        assert_eq!(changes[0].index, 0);
        assert_eq!(changes[1].index, 1);
    }

    #[test]
    fn overwrite_is_hidden_then_visible_at_same_index() {
        let old = items(&[("TEST", "value0")]);
        let new = items(&[("TEST", "value")]);
        let changes = roundtrip(&old, &new);
        assert_eq!(
            changes,
            vec![
                CookieChange::new(ChangeType::Hidden, &old[0], 0),
                CookieChange::new(ChangeType::Visible, &new[0], 0),
            ]
        );
    }

    #[test]
    fn hidden_events_are_descending_and_reference_old_positions() {
        let old = items(&[("A", "1"), ("B", "2"), ("C", "3"), ("D", "4")]);
        let new = items(&[("B", "2"), ("D", "4")]);
        let changes = roundtrip(&old, &new);
        let indices: Vec<_> = changes.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![2, 0]);
        assert_eq!(changes[0].name, "C");
    }

    #[test]
    fn middle_overwrite_keeps_neighbours() {
        let old = items(&[("A", "1"), ("B", "2"), ("C", "3")]);
        let new = items(&[("A", "1"), ("B", "two"), ("C", "3")]);
        let changes = roundtrip(&old, &new);
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.index == 1));
    }

    #[test]
    fn mixed_changes_replay_exactly() {
        let old = items(&[("A", "1"), ("B", "2"), ("C", "3"), ("D", "4"), ("E", "5")]);
        let new = items(&[("X", "0"), ("B", "2"), ("D", "four"), ("E", "5"), ("F", "6"), ("A", "1")]);
        roundtrip(&old, &new);
    }

    #[test]
    fn mismatched_hidden_event_is_consistency_error() {
        let view = items(&[("A", "1"), ("B", "2")]);
        let bogus = vec![CookieChange::new(ChangeType::Hidden, &CookieListItem::new("B", "2"), 0)];
        let err = apply_changes(&view, &bogus).unwrap_err();
        assert!(err.is_consistency());
    }

    #[test]
    fn out_of_range_insertion_is_consistency_error() {
        let bogus = vec![CookieChange::new(ChangeType::Visible, &CookieListItem::new("A", "1"), 3)];
        assert!(apply_changes(&[], &bogus).unwrap_err().is_consistency());
    }

    #[test]
    fn change_type_serializes_lowercase() {
        let c = CookieChange::new(ChangeType::Visible, &CookieListItem::new("A", "1"), 0);
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(json, r#"{"type":"visible","name":"A","value":"1","index":0}"#);
    }
}
