use fxhash::FxHashMap;
use rust_decimal::Decimal;

use crate::error::LedgerError;
use crate::model::{CurrencyCode, Money};

/// Source of exchange rates for cross-currency queries. The engine never
/// fetches rates itself; callers hand in whatever implementation they have.
pub trait CurrencyConverter {
    /// Multiplier that turns an amount in `from` into an amount in `to`.
    /// `None` when no rate is available for the pair.
    fn rate(&self, from: &CurrencyCode, to: &CurrencyCode) -> Option<Decimal>;
}

/// Converts `amount` from one currency to another. Same-currency
/// conversions never consult the converter.
pub fn convert(
    amount: Money,
    from: &CurrencyCode,
    to: &CurrencyCode,
    converter: &dyn CurrencyConverter,
) -> Result<Money, LedgerError> {
    if from == to {
        return Ok(amount);
    }
    let rate = converter
        .rate(from, to)
        .ok_or_else(|| LedgerError::CurrencyUnavailable {
            from: from.clone(),
            to: to.clone(),
        })?;
    Ok(amount * rate)
}

/// Static rate table, mostly for tests and offline use.
#[derive(Clone, Debug, Default)]
pub struct FixedRateTable {
    rates: FxHashMap<(CurrencyCode, CurrencyCode), Decimal>,
}

impl FixedRateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rate(mut self, from: CurrencyCode, to: CurrencyCode, rate: Decimal) -> Self {
        self.rates.insert((from, to), rate);
        self
    }
}

impl CurrencyConverter for FixedRateTable {
    fn rate(&self, from: &CurrencyCode, to: &CurrencyCode) -> Option<Decimal> {
        if from == to {
            return Some(Decimal::ONE);
        }
        self.rates.get(&(from.clone(), to.clone())).copied()
    }
}
