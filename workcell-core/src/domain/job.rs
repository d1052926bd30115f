//! Job domain types

use serde::{Deserialize, Serialize};

/// A queued work order for the robot cell
///
/// Structure shared between the store (persists) and the dispatcher (updates).
/// `id` is assigned by the store on insertion and is the only ordering key
/// used when picking the next job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub item_type: String,
    pub part_type: String,
    pub remaining: u32,
    pub in_production: bool,
}

impl JobRecord {
    /// Creates a record that has not been stored yet
    pub fn new(item_type: impl Into<String>, part_type: impl Into<String>, remaining: u32) -> Self {
        Self {
            id: String::new(),
            item_type: item_type.into(),
            part_type: part_type.into(),
            remaining,
            in_production: false,
        }
    }

    /// Job select command understood by the robot controller
    ///
    /// Format: `JS:<ITEM>_<PART>:<remaining>`, type names upper-cased.
    pub fn job_select(&self) -> String {
        format!(
            "JS:{}_{}:{}",
            self.item_type.to_uppercase(),
            self.part_type.to_uppercase(),
            self.remaining
        )
    }

    /// Decrements the remaining count
    ///
    /// Returns `false` and leaves the record untouched when nothing is left.
    pub fn decrement(&mut self) -> bool {
        match self.remaining.checked_sub(1) {
            Some(left) => {
                self.remaining = left;
                true
            }
            None => false,
        }
    }

    /// Whether the record can be deleted from the store
    pub fn is_consumed(&self) -> bool {
        self.remaining == 0 && !self.in_production
    }
}
