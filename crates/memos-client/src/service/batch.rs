//! Per-item outcomes of batch memo creation.

use crate::models::MemoName;
use crate::{Error, Result};

#[derive(Debug)]
pub enum BatchOutcome {
    Created(MemoName),
    /// The memo exists on the server but a follow-up step, such as
    /// linking its attachments, failed.
    CreatedWithErrors { name: MemoName, error: Error },
    Failed(Error),
}

impl BatchOutcome {
    /// Name of the memo when the server created it.
    #[must_use]
    pub const fn name(&self) -> Option<&MemoName> {
        match self {
            Self::Created(name) | Self::CreatedWithErrors { name, .. } => Some(name),
            Self::Failed(_) => None,
        }
    }

    #[must_use]
    pub const fn error(&self) -> Option<&Error> {
        match self {
            Self::Created(_) => None,
            Self::CreatedWithErrors { error, .. } | Self::Failed(error) => Some(error),
        }
    }
}

/// Outcome of the input item at `index`.
#[derive(Debug)]
pub struct BatchItem {
    pub index: usize,
    pub outcome: BatchOutcome,
}

/// Outcomes of a batch, in input order.
#[derive(Debug, Default)]
pub struct BatchReport {
    items: Vec<BatchItem>,
}

impl BatchReport {
    pub(crate) fn new(mut items: Vec<BatchItem>) -> Self {
        items.sort_by_key(|item| item.index);
        Self { items }
    }

    #[must_use]
    pub fn items(&self) -> &[BatchItem] {
        &self.items
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// `(index, memo name)` for each memo that exists on the server,
    /// including those created with errors.
    pub fn succeeded(&self) -> impl Iterator<Item = (usize, &MemoName)> {
        self.items
            .iter()
            .filter_map(|item| item.outcome.name().map(|name| (item.index, name)))
    }

    /// `(index, error)` for each item that did not complete cleanly.
    pub fn failed(&self) -> impl Iterator<Item = (usize, &Error)> {
        self.items
            .iter()
            .filter_map(|item| item.outcome.error().map(|error| (item.index, error)))
    }

    /// Items the server never created; these are safe to resubmit.
    pub fn not_created(&self) -> impl Iterator<Item = (usize, &Error)> {
        self.items.iter().filter_map(|item| match &item.outcome {
            BatchOutcome::Failed(error) => Some((item.index, error)),
            BatchOutcome::Created(_) | BatchOutcome::CreatedWithErrors { .. } => None,
        })
    }

    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.failed().next().is_none()
    }

    /// Created names in input order, or `PartialBatchFailure` carrying this
    /// report when any item failed.
    pub fn into_result(self) -> Result<Vec<MemoName>> {
        if !self.all_succeeded() {
            return Err(Error::PartialBatchFailure {
                operation: "create_memos_batch",
                report: self,
            });
        }
        Ok(self
            .items
            .into_iter()
            .filter_map(|item| match item.outcome {
                BatchOutcome::Created(name) => Some(name),
                BatchOutcome::CreatedWithErrors { .. } | BatchOutcome::Failed(_) => None,
            })
            .collect())
    }
}
