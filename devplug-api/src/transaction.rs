use crate::device::Id;
use chrono::{DateTime, Utc};

/// The lifecycle state of an asynchronous write. Transitions are
/// monotonic: `PENDING -> WRITING -> {DONE, ERROR}`. Nothing ever
/// moves a transaction backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pending,
    Writing,
    Done,
    Error,
}

/// A tracked record of one asynchronous write's lifecycle, keyed by a
/// randomly generated id (never derived from the device id, to avoid
/// collisions across restarts).
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub id: String,
    pub device_id: Id,
    pub status: Status,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(id: String, device_id: Id, now: DateTime<Utc>) -> Self {
        Transaction {
            id,
            device_id,
            status: Status::Pending,
            message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies a status update, last-writer-wins. The store is
    /// responsible for enforcing the monotonic ordering invariant by
    /// only ever calling this with states that are a valid successor
    /// (the type itself doesn't prevent misuse since there's no
    /// lighter-weight way to express "WRITING or later" in this
    /// enum).
    pub fn transition(&mut self, status: Status, message: Option<String>, now: DateTime<Utc>) {
        self.status = status;
        self.message = message;
        self.updated_at = now;
    }
}
