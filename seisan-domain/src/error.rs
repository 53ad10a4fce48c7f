use thiserror::Error;

use crate::model::{CurrencyCode, ExpenseId, MemberId, PaymentId};

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Non-positive amount, negative share, or shares exceeding the
    /// expense total.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("unknown member {0}")]
    UnknownMember(MemberId),
    #[error("unknown expense {0}")]
    UnknownExpense(ExpenseId),
    /// An expense id offered to `add_expense` is already stored; edits
    /// go through `update_expense` instead.
    #[error("duplicate expense {0}")]
    DuplicateExpense(ExpenseId),
    #[error("unknown payment {0}")]
    UnknownPayment(PaymentId),
    #[error("no conversion rate from {from} to {to}")]
    CurrencyUnavailable {
        from: CurrencyCode,
        to: CurrencyCode,
    },
}
