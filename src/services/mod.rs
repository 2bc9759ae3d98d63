pub mod alerts;
pub mod numbering;
pub mod receiving;
pub mod reservations;
pub mod transactions;

pub use alerts::ThresholdMonitor;
pub use receiving::{LineReceipt, LineReceiptOutcome, ReceivingCoordinator, ReceivingResult};
pub use reservations::{ReservationManager, ReservationStore, ReserveRequest};
pub use transactions::{NewTransaction, TransactionProcessor};
