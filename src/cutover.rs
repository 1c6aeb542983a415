//! Record skip predicates.
//!
//! During a blue/green migration two stream consumers run side by side, each
//! in its own region. A [`CutoverRule`] makes sure every change is written by
//! exactly one of them: the legacy consumer handles changes made before the
//! cutover instant, the replacement handles everything from the instant on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dynamodb::ChangeRecord;

/// Decides whether a record is dropped before any transformation.
pub trait SkipPredicate: Send + Sync {
    fn should_skip(&self, record: &ChangeRecord) -> bool;
}

/// Keeps every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverSkip;

impl SkipPredicate for NeverSkip {
    fn should_skip(&self, _record: &ChangeRecord) -> bool {
        false
    }
}

impl<F> SkipPredicate for F
where
    F: Fn(&ChangeRecord) -> bool + Send + Sync,
{
    fn should_skip(&self, record: &ChangeRecord) -> bool {
        self(record)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CutoverRule {
    pub cutover_at: DateTime<Utc>,
    /// Region of the consumer being retired.
    pub legacy_region: String,
    /// Region this process is deployed in.
    pub current_region: String,
}

impl CutoverRule {
    pub fn is_legacy(&self) -> bool {
        self.current_region == self.legacy_region
    }
}

impl SkipPredicate for CutoverRule {
    fn should_skip(&self, record: &ChangeRecord) -> bool {
        let Some(changed_at) = record.approximate_change_time else {
            return false;
        };

        if self.is_legacy() {
            changed_at >= self.cutover_at
        } else {
            changed_at < self.cutover_at
        }
    }
}
