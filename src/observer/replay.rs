//! A consumer-side mirror of an observer's view, rebuilt from change batches alone.

use crate::cookies::{cookie_string, CookieListItem};
use crate::errors::CookieError;
use crate::observer::change::{apply_changes, ChangeBatch, ChangeType, CookieChange};
use serde::Serialize;

/// One applied (or rejected) batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObservationEntry {
    pub before: Option<String>,
    /// Changes rendered as `+name=value@index` / `-name=value@index`
    pub changes: Vec<String>,
    pub after: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Rebuilds an observer's view by replaying the batches delivered to it, and checks every
/// replay against the full view the batch reports.
#[derive(Debug, Clone, Default)]
pub struct ObservedStore {
    items: Vec<CookieListItem>,
    log: Vec<ObservationEntry>,
}

impl ObservedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a batch. On failure the mirror keeps its previous state and the error carries
    /// the observation log.
    pub fn apply(&mut self, batch: &ChangeBatch) -> Result<(), CookieError> {
        let before = cookie_string(&self.items);
        let changes = batch.changes.iter().map(render_change).collect();

        let result = apply_changes(&self.items, &batch.changes).and_then(|next| {
            if next == batch.all {
                Ok(next)
            } else {
                Err(CookieError::Consistency(format!(
                    "mismatch between observed store and reported store\n observed: {:?}\n reported: {:?}",
                    cookie_string(&next),
                    cookie_string(&batch.all)
                )))
            }
        });

        match result {
            Ok(next) => {
                self.items = next;
                self.log.push(ObservationEntry {
                    before,
                    changes,
                    after: cookie_string(&self.items),
                    error: None,
                });
                Ok(())
            }
            Err(e) => {
                self.log.push(ObservationEntry {
                    before: before.clone(),
                    changes,
                    after: before,
                    error: Some(e.to_string()),
                });
                Err(CookieError::Consistency(format!("{}\n log: {}", e, self.log_json())))
            }
        }
    }

    pub fn items(&self) -> &[CookieListItem] {
        &self.items
    }

    /// The mirrored view as a cookie string, optionally limited to one name.
    pub fn cookie_string(&self, name: Option<&str>) -> Option<String> {
        match name {
            None => cookie_string(&self.items),
            Some(name) => {
                let filtered: Vec<_> = self.items.iter().filter(|i| i.name == name).cloned().collect();
                cookie_string(&filtered)
            }
        }
    }

    pub fn log(&self) -> &[ObservationEntry] {
        &self.log
    }

    pub fn log_json(&self) -> String {
        serde_json::to_string(&self.log).unwrap_or_default()
    }

    /// Forgets the mirrored view and the log.
    pub fn reset(&mut self) {
        self.items.clear();
        self.log.clear();
    }
}

fn render_change(change: &CookieChange) -> String {
    let sign = match change.change_type {
        ChangeType::Visible => '+',
        ChangeType::Hidden => '-',
    };
    format!("{}{}@{}", sign, change.item().pair_string(), change.index)
}
