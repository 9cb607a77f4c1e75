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

//! Donor accounts.
//!
//! # Example
//!
//! ```
//! use donation_ledger::{Amount, NewUser, User};
//!
//! let new_user = NewUser::new("Ada");
//! assert_eq!(new_user.balance, User::DEFAULT_BALANCE);
//! assert_eq!(NewUser::new("Grace").with_balance(Amount(500)).balance, Amount(500));
//! ```

use crate::base::{Amount, UserId};
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered donor with a spendable balance.
///
/// The balance is never negative. It only decreases through
/// [`User::debit`], which the stores call under the row lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub balance: Amount,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Opening balance for users registered without an explicit one.
    pub const DEFAULT_BALANCE: Amount = Amount(1_000_000);

    /// Compare-and-subtract: debits `amount` only if the balance covers it.
    ///
    /// Returns `false` and leaves the balance untouched otherwise.
    pub(crate) fn debit(&mut self, amount: Amount) -> bool {
        debug_assert!(amount.is_positive(), "debit of non-positive amount {amount}");
        if self.balance < amount {
            return false;
        }
        match self.balance.checked_sub(amount) {
            Some(balance) => {
                self.balance = balance;
                self.assert_invariants();
                true
            }
            None => false,
        }
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.balance >= Amount::ZERO,
            "Invariant violated: balance went negative: {}",
            self.balance
        );
    }
}

/// Registration data for a new user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub name: String,
    pub balance: Amount,
}

impl NewUser {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            balance: User::DEFAULT_BALANCE,
        }
    }

    pub fn with_balance(mut self, balance: Amount) -> Self {
        self.balance = balance;
        self
    }

    pub(crate) fn check(&self) -> Result<(), StoreError> {
        if self.balance < Amount::ZERO {
            return Err(StoreError::Constraint("balance must not be negative".into()));
        }
        Ok(())
    }
}
