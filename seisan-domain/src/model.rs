use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    iter::Sum,
    ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign},
};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use smol_str::SmolStr;
use uuid::Uuid;

use crate::error::LedgerError;

pub type Timestamp = DateTime<Utc>;

/// Tolerance for every monetary comparison in the engine. Two amounts
/// closer than this are the same amount.
pub fn money_epsilon() -> Decimal {
    Decimal::new(1, 3)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    pub fn new(mantissa: i64, scale: u32) -> Self {
        Self(Decimal::new(mantissa, scale))
    }

    pub fn from_i64(value: i64) -> Self {
        Self(Decimal::new(value, 0))
    }

    pub fn from_decimal(value: Decimal) -> Self {
        Self(value)
    }

    pub fn as_decimal(self) -> Decimal {
        self.0
    }

    pub fn abs(self) -> Self {
        Self(self.0.abs())
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    /// Whether the amount is within tolerance of zero.
    pub fn is_negligible(self) -> bool {
        self.0.abs() <= money_epsilon()
    }

    pub fn signum(self) -> i64 {
        if self.0.is_zero() {
            0
        } else if self.0.is_sign_positive() {
            1
        } else {
            -1
        }
    }

    /// Difference floored at zero, used for outstanding-debt arithmetic.
    pub fn saturating_sub(self, rhs: Self) -> Self {
        if rhs.0 >= self.0 {
            Money::ZERO
        } else {
            Self(self.0 - rhs.0)
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add for Money {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Neg for Money {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self(-self.0)
    }
}

impl Mul<Decimal> for Money {
    type Output = Self;

    fn mul(self, rhs: Decimal) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl Div<Decimal> for Money {
    type Output = Self;

    fn div(self, rhs: Decimal) -> Self::Output {
        Self(self.0 / rhs)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        Self(iter.map(|money| money.0).sum())
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        Self(iter.map(|money| money.0).sum())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(pub Uuid);

impl MemberId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpenseId(pub Uuid);

impl ExpenseId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }
}

impl fmt::Display for ExpenseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentId(pub Uuid);

impl PaymentId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }
}

impl fmt::Display for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeId(pub Uuid);

impl ScopeId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CurrencyCode(SmolStr);

impl CurrencyCode {
    pub fn new(code: impl AsRef<str>) -> Self {
        Self(SmolStr::new(code))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Category(SmolStr);

impl Category {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(SmolStr::new(name))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub name: String,
    pub joined_at: Timestamp,
    pub left_at: Option<Timestamp>,
}

impl Member {
    pub fn is_active(&self) -> bool {
        self.left_at.is_none()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    pub id: ExpenseId,
    pub description: String,
    pub amount: Money,
    pub currency: CurrencyCode,
    pub category: Category,
    pub payer: MemberId,
    pub date: Timestamp,
    /// Per-member owed shares. Members absent from the map owe nothing.
    pub split: BTreeMap<MemberId, Money>,
    /// Portion of `amount` the payer consumed themselves when they are
    /// not listed in the split map. Subtracted from the payer's credit,
    /// added to nobody's debt.
    pub payer_earned: Option<Money>,
    pub scope: Option<ScopeId>,
}

impl Expense {
    pub fn share_of(&self, member: MemberId) -> Money {
        self.split.get(&member).copied().unwrap_or(Money::ZERO)
    }

    pub fn in_scope(&self, scope: Option<ScopeId>) -> bool {
        match scope {
            None => true,
            some => self.scope == some,
        }
    }

    /// Net amount credited to the payer once their own earned portion
    /// is taken out.
    pub fn payer_credit(&self) -> Money {
        self.amount - self.payer_earned.unwrap_or(Money::ZERO)
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.amount.as_decimal() <= money_epsilon() {
            return Err(LedgerError::InvalidAmount(format!(
                "expense {} amount must be positive (found {})",
                self.id, self.amount
            )));
        }
        let mut share_total = Money::ZERO;
        for (member, share) in &self.split {
            if share.as_decimal().is_sign_negative() && !share.is_negligible() {
                return Err(LedgerError::InvalidAmount(format!(
                    "expense {} share for member {member} must not be negative (found {share})",
                    self.id
                )));
            }
            share_total += *share;
        }
        if let Some(earned) = self.payer_earned {
            if earned.as_decimal().is_sign_negative() && !earned.is_negligible() {
                return Err(LedgerError::InvalidAmount(format!(
                    "expense {} payer-earned portion must not be negative (found {earned})",
                    self.id
                )));
            }
            share_total += earned;
        }
        if share_total.as_decimal() > self.amount.as_decimal() + money_epsilon() {
            return Err(LedgerError::InvalidAmount(format!(
                "expense {} shares total {share_total} exceed amount {}",
                self.id, self.amount
            )));
        }
        Ok(())
    }
}

/// A recorded debtor-to-creditor payment. `amount_received` is what changed
/// hands; `amount_applied` is the slice of it that reduced debt. The two
/// differ exactly when change was returned or a shortfall was forgiven.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub debtor: MemberId,
    pub creditor: MemberId,
    pub currency: CurrencyCode,
    pub amount_applied: Money,
    pub amount_received: Money,
    pub change_returned: Option<Money>,
    pub amount_forgiven: Option<Money>,
    /// Expenses this payment was earmarked for. Empty means the payment
    /// counts against the pair's aggregate debt only.
    pub targets: BTreeSet<ExpenseId>,
    pub recorded_at: Timestamp,
    pub note: Option<String>,
}

impl Payment {
    pub fn pair(&self) -> PairKey {
        PairKey {
            debtor: self.debtor,
            creditor: self.creditor,
        }
    }

    pub fn is_unallocated(&self) -> bool {
        self.targets.is_empty()
    }

    /// Even slice of the applied amount attributed to each target expense.
    /// Callers must not ask for this on an unallocated payment.
    pub fn allocation_per_target(&self) -> Money {
        debug_assert!(!self.targets.is_empty());
        self.amount_applied / Decimal::from(self.targets.len() as u64)
    }
}

/// Directed debtor/creditor pair. `(a, b)` and `(b, a)` are distinct
/// relationships with independent marks, checkpoints, and payments.
/// Serializes to a `debtor->creditor` string so it can key JSON maps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PairKey {
    pub debtor: MemberId,
    pub creditor: MemberId,
}

impl PairKey {
    pub fn new(debtor: MemberId, creditor: MemberId) -> Self {
        Self { debtor, creditor }
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.debtor, self.creditor)
    }
}

impl Serialize for PairKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PairKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        let (debtor, creditor) = text
            .split_once("->")
            .ok_or_else(|| de::Error::custom("pair key must look like `debtor->creditor`"))?;
        let debtor = Uuid::parse_str(debtor).map_err(de::Error::custom)?;
        let creditor = Uuid::parse_str(creditor).map_err(de::Error::custom)?;
        Ok(PairKey::new(MemberId(debtor), MemberId(creditor)))
    }
}

/// Settlement checkpoint for one pair. `frozen` only ever grows: once an
/// expense id lands here it is excluded from the pair's live debt for good.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub frozen: BTreeSet<ExpenseId>,
    pub last_checkpoint_at: Timestamp,
    /// Display flag toggled by mark/unmark. Clearing it never thaws
    /// `frozen`.
    pub explicitly_settled: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebtorAdjustments {
    pub forgiven: Money,
    pub change_returned: Money,
}

/// Lifetime totals of debt a creditor forgave and change they returned.
/// Both only ever grow; removing or editing payments never claws back
/// what was already recorded here.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifetimeAdjustments {
    pub forgiven: Money,
    pub change_returned: Money,
    pub by_debtor: BTreeMap<MemberId, DebtorAdjustments>,
}

impl LifetimeAdjustments {
    pub(crate) fn add_forgiven(&mut self, debtor: MemberId, amount: Money) {
        if amount.as_decimal() <= Decimal::ZERO {
            return;
        }
        self.forgiven += amount;
        self.by_debtor.entry(debtor).or_default().forgiven += amount;
    }

    pub(crate) fn add_change_returned(&mut self, debtor: MemberId, amount: Money) {
        if amount.as_decimal() <= Decimal::ZERO {
            return;
        }
        self.change_returned += amount;
        self.by_debtor.entry(debtor).or_default().change_returned += amount;
    }
}

pub type MemberBalances = BTreeMap<MemberId, Money>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub debtor: MemberId,
    pub creditor: MemberId,
    pub amount: Money,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairStatus {
    /// Live debt outstanding.
    Open,
    /// All live debt paid off or vacuously absent.
    Settled,
    /// Checkpointed. Stays closed until a fresh expense reopens the pair.
    Closed,
}

impl fmt::Display for PairStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PairStatus::Open => "open",
            PairStatus::Settled => "settled",
            PairStatus::Closed => "closed",
        };
        write!(f, "{label}")
    }
}
