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

use crate::donation::Donation;
use crate::error::DonationError;
use crate::goal::Goal;
use crate::user::User;
use serde::Serialize;

/// Post-commit view of a donation, the goal it funded and the donor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DonationReceipt {
    pub donation: Donation,
    pub goal: Goal,
    /// Always `None` for anonymous donations.
    pub user: Option<User>,
    /// `true` when an idempotent retry returned an earlier donation.
    pub replayed: bool,
}

/// Builds the receipt for a freshly committed donation.
///
/// The user row is dropped for anonymous donations. An attributed donation
/// without a user row means the store lost a row mid-transaction.
pub fn assemble(
    donation: Donation,
    goal: Goal,
    user: Option<User>,
) -> Result<DonationReceipt, DonationError> {
    let user = match donation.user_id() {
        None => None,
        Some(user_id) => match user {
            Some(user) if user.id == user_id => Some(user),
            _ => {
                return Err(DonationError::TransactionAborted(format!(
                    "user {user_id} missing from donation snapshot"
                )));
            }
        },
    };
    debug_assert_eq!(donation.goal_id, goal.id);
    Ok(DonationReceipt {
        donation,
        goal,
        user,
        replayed: false,
    })
}

impl DonationReceipt {
    pub(crate) fn replayed(mut self) -> Self {
        self.replayed = true;
        self
    }
}
