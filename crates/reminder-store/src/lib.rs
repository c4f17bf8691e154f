pub mod idempotency;
pub mod ledger;
pub mod pending;
pub mod reminders;

pub use idempotency::IdempotencyStore;
pub use ledger::LedgerStore;
pub use pending::PendingStore;
pub use reminders::ReminderStore;
