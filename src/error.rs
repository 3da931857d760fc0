use thiserror::Error;

/// Errors surfaced across the public queue API.
///
/// The only failure mode a caller can observe is an allocation that didn't
/// happen: node allocation on `push`, hazard-record allocation on `attach`,
/// or retire-list/protected-list growth during a scan.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("allocation failed")]
    OutOfMemory,
}

impl From<HazardError> for QueueError {
    fn from(err: HazardError) -> Self {
        match err {
            HazardError::OutOfMemory => QueueError::OutOfMemory,
            HazardError::InvalidSlot { .. } => {
                unreachable!("queue-internal hazard slot indices are always in range")
            }
        }
    }
}

/// Internal hazard-record-manager errors.
///
/// `InvalidSlot` is bug-shaped rather than a runtime condition a caller is
/// expected to recover from: the only callers of `set_hazard`/`clear_hazard`
/// are the queue's own `push`/`pop`, which always pass one of the two fixed
/// slot constants.
#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum HazardError {
    #[error("allocation failed while registering a hazard record")]
    OutOfMemory,
    #[error("hazard slot index {index} out of range (record holds {capacity} slots)")]
    InvalidSlot { index: usize, capacity: usize },
}
