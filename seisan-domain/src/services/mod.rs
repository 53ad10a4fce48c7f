pub mod balance_calculator;
pub mod checkpoints;
pub mod debt_netter;
pub mod expense_marks;
pub mod payment_ledger;
pub mod settlement_reporter;

pub use balance_calculator::BalanceCalculator;
pub use checkpoints::CheckpointManager;
pub use debt_netter::DebtNetter;
pub use expense_marks::ExpenseMarkTracker;
pub use payment_ledger::{Apportioned, PaymentLedger};
pub use settlement_reporter::SettlementReporter;
