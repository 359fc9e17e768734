use thiserror::Error;

use super::types::{PageId, TransactionId};

/// Why the lock manager aborted a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// A lock was requested after the transaction entered its shrinking phase
    LockOnShrinking,
    /// A shared lock was requested under READ_UNCOMMITTED isolation
    LockSharedOnReadUncommitted,
    /// Another transaction is already upgrading its lock on the same tuple
    UpgradeConflict,
    /// The transaction was chosen as a deadlock victim
    Deadlock,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AbortReason::LockOnShrinking => "lock acquired while shrinking",
            AbortReason::LockSharedOnReadUncommitted => {
                "shared lock under read-uncommitted isolation"
            }
            AbortReason::UpgradeConflict => "conflicting lock upgrade",
            AbortReason::Deadlock => "deadlock victim",
        };
        f.write_str(s)
    }
}

/// Database error types
#[derive(Error, Debug)]
pub enum QuarryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Page {0} not found")]
    PageNotFound(PageId),

    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("Buffer pool is full, no evictable frames available")]
    BufferPoolFull,

    #[error("Page {0} is still pinned")]
    PageStillPinned(PageId),

    #[error("Page {0} is not latched by the current operation")]
    PageNotLatched(PageId),

    #[error("Disk scheduler error: {0}")]
    DiskScheduler(String),

    #[error("Header page is full")]
    HeaderPageFull,

    #[error("Page overflow: tuple size {tuple_size} exceeds available space {available}")]
    PageOverflow { tuple_size: usize, available: usize },

    #[error("Invalid slot ID: {0}")]
    InvalidSlotId(u16),

    #[error("Slot {0} is empty")]
    EmptySlot(u16),

    #[error("Index corrupted: {0}")]
    IndexCorrupted(String),

    #[error("Transaction {txn_id} aborted: {reason}")]
    TransactionAbort {
        txn_id: TransactionId,
        reason: AbortReason,
    },
}

impl QuarryError {
    /// The abort reason, if this error is a transaction abort.
    pub fn abort_reason(&self) -> Option<AbortReason> {
        match self {
            QuarryError::TransactionAbort { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, QuarryError>;
