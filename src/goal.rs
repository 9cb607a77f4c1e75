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

//! Fundraising goals.

use crate::base::{Amount, GoalId};
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A fundraising target and its running total.
///
/// `collected_amount` is a materialized aggregate: it always equals the sum
/// of the committed donations against the goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    pub id: GoalId,
    pub title: String,
    pub description: Option<String>,
    pub target_amount: Option<Amount>,
    pub collected_amount: Amount,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Goal {
    /// Adds `amount` to the collected total.
    pub(crate) fn credit(&mut self, amount: Amount) -> Result<(), StoreError> {
        debug_assert!(amount.is_positive(), "credit of non-positive amount {amount}");
        self.collected_amount = self
            .collected_amount
            .checked_add(amount)
            .ok_or_else(|| StoreError::Constraint("collected amount overflow".into()))?;
        Ok(())
    }

    /// Returns `true` once the collected total has reached the target.
    pub fn is_funded(&self) -> bool {
        self.target_amount
            .is_some_and(|target| self.collected_amount >= target)
    }
}

/// Creation data for a new goal. Goals start active with nothing collected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGoal {
    pub title: String,
    pub description: Option<String>,
    pub target_amount: Option<Amount>,
    pub is_active: bool,
}

impl NewGoal {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            target_amount: None,
            is_active: true,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_target(mut self, target: Amount) -> Self {
        self.target_amount = Some(target);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub(crate) fn check(&self) -> Result<(), StoreError> {
        if self.target_amount.is_some_and(|target| !target.is_positive()) {
            return Err(StoreError::Constraint("target amount must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn goal(collected: i64, target: Option<i64>) -> Goal {
        Goal {
            id: GoalId(1),
            title: "Roof repair".into(),
            description: None,
            target_amount: target.map(Amount),
            collected_amount: Amount(collected),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn credit_adds_to_collected() {
        let mut goal = goal(100, None);
        goal.credit(Amount(50)).unwrap();
        assert_eq!(goal.collected_amount, Amount(150));
    }

    #[test]
    fn credit_overflow_is_a_constraint_error() {
        let mut goal = goal(i64::MAX, None);
        assert!(matches!(
            goal.credit(Amount(1)),
            Err(StoreError::Constraint(_))
        ));
        assert_eq!(goal.collected_amount, Amount(i64::MAX));
    }

    #[test]
    fn funded_once_target_reached() {
        assert!(!goal(9_999, Some(10_000)).is_funded());
        assert!(goal(10_000, Some(10_000)).is_funded());
        assert!(!goal(10_000, None).is_funded());
    }

    #[test]
    fn new_goal_rejects_non_positive_target() {
        assert!(NewGoal::new("x").with_target(Amount(0)).check().is_err());
        assert!(NewGoal::new("x").with_target(Amount(1)).check().is_ok());
        assert!(NewGoal::new("x").check().is_ok());
    }
}
