use std::fmt;

use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};

use super::fetcher::FetchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BalanceKind {
    Native,
    Token,
}

impl fmt::Display for BalanceKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BalanceKind::Native => write!(f, "native"),
            BalanceKind::Token => write!(f, "token"),
        }
    }
}

/// Both balances of one address as observed during one cycle. A failed fetch is kept as the
/// error, a record is never dropped because its fetches failed.
#[derive(Debug, Clone)]
pub struct BalanceRecord {
    pub address: String,
    pub native: Result<BigDecimal, FetchError>,
    pub token: Result<BigDecimal, FetchError>,
    pub observed_at: DateTime<Utc>,
}

impl BalanceRecord {
    pub fn balance(&self, kind: BalanceKind) -> Option<&BigDecimal> {
        self.result(kind).as_ref().ok()
    }

    pub fn error(&self, kind: BalanceKind) -> Option<&FetchError> {
        self.result(kind).as_ref().err()
    }

    fn result(&self, kind: BalanceKind) -> &Result<BigDecimal, FetchError> {
        match kind {
            BalanceKind::Native => &self.native,
            BalanceKind::Token => &self.token,
        }
    }

    pub fn is_total_failure(&self) -> bool {
        self.native.is_err() && self.token.is_err()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Changed,
    Unchanged,
    /// Either side of the comparison is missing.
    NotApplicable,
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Change::Changed => write!(f, "true"),
            Change::Unchanged => write!(f, "false"),
            Change::NotApplicable => write!(f, "N/A"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BalanceComparison {
    pub previous: Option<BigDecimal>,
    pub current: Option<BigDecimal>,
    pub delta: Option<BigDecimal>,
    pub changed: Change,
}

impl BalanceComparison {
    pub fn new(previous: Option<BigDecimal>, current: Option<BigDecimal>) -> Self {
        let delta = match (&previous, &current) {
            (Some(previous), Some(current)) => Some(current - previous),
            _ => None,
        };

        let changed = match &delta {
            Some(delta) if delta.is_zero() => Change::Unchanged,
            Some(_) => Change::Changed,
            None => Change::NotApplicable,
        };

        Self {
            previous,
            current,
            delta,
            changed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonRecord {
    pub address: String,
    pub native: BalanceComparison,
    pub token: BalanceComparison,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeStats {
    pub total_addresses: usize,
    pub both_succeeded: usize,
    pub native_only: usize,
    pub token_only: usize,
    pub neither: usize,
    pub native_changes: usize,
    pub token_changes: usize,
    pub previous_run: Option<DateTime<Utc>>,
    pub current_run: DateTime<Utc>,
}

/// Renders a balance without trailing zeros, integers never use a positive exponent.
pub fn format_decimal(value: &BigDecimal) -> String {
    let normalized = value.normalized();
    if normalized.fractional_digit_count() < 0 {
        normalized.with_scale(0).to_string()
    } else {
        normalized.to_string()
    }
}
