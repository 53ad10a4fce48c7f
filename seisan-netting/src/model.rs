use rust_decimal::Decimal;

/// Signed net position of one participant (positive: is owed money,
/// negative: owes money). The unit is whatever single currency the
/// caller computed the balances in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NetPosition<Id> {
    pub id: Id,
    pub balance: Decimal,
}

/// A directed transfer instruction: `debtor` pays `creditor` `amount`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transfer<Id> {
    pub debtor: Id,
    pub creditor: Id,
    pub amount: Decimal,
}

/// Outcome of a netting run. `residual` is the total magnitude left
/// unmatched when the input positions did not sum to zero; it stays
/// within the tolerance for balanced inputs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Netting<Id> {
    pub transfers: Vec<Transfer<Id>>,
    pub residual: Decimal,
}
