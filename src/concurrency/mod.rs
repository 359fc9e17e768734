mod lock_manager;
mod transaction;

pub use lock_manager::{LockManager, LockMode};
pub use transaction::{
    IsolationLevel, PageLatch, Transaction, TransactionManager, TransactionState,
};
