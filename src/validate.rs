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

//! Donation preconditions.
//!
//! Pure functions over rows the caller has already read (and, inside the
//! engine, locked). Checks run in a fixed order so the first failing
//! precondition decides the error: amount, goal existence, goal activity,
//! user existence, balance.

use crate::base::{Amount, GoalId, UserId};
use crate::error::DonationError;
use crate::goal::Goal;
use crate::user::User;

/// The donor side of a donation as read from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DonorSnapshot<'a> {
    Anonymous,
    /// `user` is `None` when no row exists for `user_id`.
    Attributed {
        user_id: UserId,
        user: Option<&'a User>,
    },
}

/// Rejects zero and negative amounts.
pub fn check_amount(amount: Amount) -> Result<(), DonationError> {
    if amount.is_positive() {
        Ok(())
    } else {
        Err(DonationError::InvalidAmount)
    }
}

/// Decides whether a donation of `amount` to `goal_id` may proceed.
///
/// # Errors
///
/// - [`DonationError::InvalidAmount`] - `amount` is not positive.
/// - [`DonationError::GoalNotFound`] - `goal` is `None`.
/// - [`DonationError::GoalInactive`] - the goal does not accept donations.
/// - [`DonationError::UserNotFound`] - attributed donor without a user row.
/// - [`DonationError::InsufficientBalance`] - the user cannot cover `amount`.
pub fn check_donation(
    goal_id: GoalId,
    goal: Option<&Goal>,
    donor: DonorSnapshot<'_>,
    amount: Amount,
) -> Result<(), DonationError> {
    check_amount(amount)?;

    let goal = goal.ok_or(DonationError::GoalNotFound(goal_id))?;
    if !goal.is_active {
        return Err(DonationError::GoalInactive(goal_id));
    }

    match donor {
        DonorSnapshot::Anonymous => Ok(()),
        DonorSnapshot::Attributed { user_id, user } => {
            let user = user.ok_or(DonationError::UserNotFound(user_id))?;
            if user.balance < amount {
                return Err(DonationError::InsufficientBalance {
                    user_id,
                    balance: user.balance,
                    requested: amount,
                });
            }
            Ok(())
        }
    }
}
