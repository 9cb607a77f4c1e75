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

//! Goal conservation check.
//!
//! A goal's stored `collected_amount` must always equal the sum of the
//! donations recorded against it. Amounts are integers, so the comparison is
//! exact.

use crate::base::{Amount, GoalId};
use serde::Serialize;

/// Outcome of comparing a goal's aggregate with its donation rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConservationReport {
    pub goal_id: GoalId,
    /// Aggregate stored on the goal row.
    pub collected: Amount,
    /// Sum of committed donations.
    pub donated: Amount,
    pub balanced: bool,
}

impl ConservationReport {
    pub fn new(goal_id: GoalId, collected: Amount, donated: Amount) -> Self {
        Self {
            goal_id,
            collected,
            donated,
            balanced: collected == donated,
        }
    }

    /// `collected - donated`; zero when balanced.
    pub fn drift(&self) -> i128 {
        i128::from(self.collected.0) - i128::from(self.donated.0)
    }
}
