#![warn(clippy::uninlined_format_args)]

pub mod error;
pub mod model;
pub mod rates;
pub mod services;
pub mod snapshot;

pub use error::LedgerError;
pub use model::{
    money_epsilon, Category, Checkpoint, CurrencyCode, DebtorAdjustments, Expense, ExpenseId,
    LifetimeAdjustments, Member, MemberBalances, MemberId, Money, PairKey, PairStatus, Payment,
    PaymentId, ScopeId, Timestamp, Transfer,
};
pub use rates::{convert, CurrencyConverter, FixedRateTable};
pub use services::{
    Apportioned, BalanceCalculator, CheckpointManager, DebtNetter, ExpenseMarkTracker,
    PaymentLedger, SettlementReporter,
};
pub use snapshot::{Ledger, PaymentDraft, PaymentUpdate};
