// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Core identifier and money types.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a user (donor) row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a fundraising goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct GoalId(pub i64);

impl fmt::Display for GoalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a donation.
///
/// Assigned by the store on insert. Ids of rolled back inserts are never
/// reused, so the committed sequence may have gaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct DonationId(pub i64);

impl fmt::Display for DonationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client-supplied key used to deduplicate retried donation requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct IdempotencyKey(pub String);

impl IdempotencyKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Money in the smallest currency unit (cents).
///
/// Signed so that a caller-supplied negative amount can be represented and
/// rejected, rather than silently wrapped.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize,
)]
#[serde(transparent)]
pub struct Amount(pub i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    /// Number of decimal places between the minor and the major unit.
    pub const SCALE: u32 = 2;

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    /// Renders the amount in major units, e.g. `2500` as `25.00`.
    pub fn to_decimal(self) -> Decimal {
        Decimal::new(self.0, Self::SCALE)
    }

    /// Converts a major-unit decimal into minor units.
    ///
    /// Returns `None` when the value carries more precision than a cent or
    /// does not fit in an `i64`.
    pub fn from_decimal(value: Decimal) -> Option<Amount> {
        let value = value.normalize();
        if value.scale() > Self::SCALE {
            return None;
        }
        let minor = value.checked_mul(Decimal::from(10i64.pow(Self::SCALE)))?;
        i64::try_from(minor).ok().map(Amount)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn amount_renders_in_major_units() {
        assert_eq!(Amount(2500).to_decimal(), dec!(25.00));
        assert_eq!(Amount(1).to_decimal().to_string(), "0.01");
        assert_eq!(Amount(-150).to_decimal(), dec!(-1.50));
    }

    #[test]
    fn amount_from_decimal_accepts_cents() {
        assert_eq!(Amount::from_decimal(dec!(25.00)), Some(Amount(2500)));
        assert_eq!(Amount::from_decimal(dec!(0.5)), Some(Amount(50)));
        assert_eq!(Amount::from_decimal(dec!(100)), Some(Amount(10000)));
    }

    #[test]
    fn amount_from_decimal_rejects_sub_cent_precision() {
        assert_eq!(Amount::from_decimal(dec!(1.005)), None);
    }

    #[test]
    fn amount_from_decimal_ignores_trailing_zeros() {
        assert_eq!(Amount::from_decimal(dec!(1.5000)), Some(Amount(150)));
    }

    #[test]
    fn amount_from_decimal_rejects_overflow() {
        assert_eq!(Amount::from_decimal(Decimal::MAX), None);
    }

    #[test]
    fn checked_arithmetic_detects_overflow() {
        assert_eq!(Amount(i64::MAX).checked_add(Amount(1)), None);
        assert_eq!(Amount(10).checked_sub(Amount(3)), Some(Amount(7)));
    }

    #[test]
    fn ids_display_as_integers() {
        assert_eq!(UserId(7).to_string(), "7");
        assert_eq!(GoalId(42).to_string(), "42");
        assert_eq!(DonationId(3).to_string(), "3");
        assert_eq!(IdempotencyKey::new("abc").to_string(), "abc");
    }
}
