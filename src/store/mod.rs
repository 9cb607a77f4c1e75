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

//! Ledger persistence.
//!
//! A [`LedgerStore`] is two things:
//!
//! - a directory of users, goals and committed donations, read and written
//!   one statement at a time by the collaborators around the engine, and
//! - a runner for [`UnitOfWork`]s, the atomic read-modify-write scopes the
//!   [`Engine`](crate::Engine) runs each donation in.
//!
//! # Lock ordering
//!
//! A unit of work takes row locks in ascending [`RowKey`] order: every goal
//! before any user, and ascending ids within a kind. Both backends track the
//! highest key held and refuse an out-of-order request with
//! [`StoreError::LockOrder`], so two units of work can never wait on each
//! other in a cycle.
//!
//! # Rollback
//!
//! [`LedgerStore::transact`] commits when its closure returns `Ok` and rolls
//! back every write otherwise, including donation inserts.

mod memory;
mod schema;
mod sqlite;

pub use memory::{MemoryStore, MemoryUnitOfWork};
pub use sqlite::{SqliteStore, SqliteUnitOfWork};

use crate::base::{Amount, DonationId, GoalId, IdempotencyKey, UserId};
use crate::donation::{Donation, NewDonation};
use crate::error::StoreError;
use crate::goal::{Goal, NewGoal};
use crate::user::{NewUser, User};

/// Position of a row in the global lock order.
///
/// Variant order is significant: the derived `Ord` places goals before users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RowKey {
    Goal(GoalId),
    User(UserId),
}

/// Tracks the highest row key a unit of work holds.
#[derive(Debug, Default)]
pub(crate) struct LockSequence {
    highest: Option<RowKey>,
}

impl LockSequence {
    /// Records `key` as acquired if it does not go backwards in the order.
    ///
    /// Re-acquiring a key already at or below the high-water mark is allowed
    /// when the caller already holds that exact row; that check is the
    /// caller's, since only it knows which rows it holds.
    pub(crate) fn acquire(&mut self, key: RowKey, already_held: bool) -> Result<(), StoreError> {
        if already_held {
            return Ok(());
        }
        match self.highest {
            Some(held) if key < held => Err(StoreError::LockOrder {
                held,
                requested: key,
            }),
            _ => {
                self.highest = Some(key);
                Ok(())
            }
        }
    }
}

/// Which committed donations to list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DonationFilter {
    #[default]
    All,
    Goal(GoalId),
    User(UserId),
}

impl DonationFilter {
    pub(crate) fn accepts(&self, donation: &Donation) -> bool {
        match self {
            DonationFilter::All => true,
            DonationFilter::Goal(goal_id) => donation.goal_id == *goal_id,
            DonationFilter::User(user_id) => donation.user_id() == Some(*user_id),
        }
    }
}

/// Limit/offset paging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: usize,
    pub offset: usize,
}

impl Page {
    pub const DEFAULT_LIMIT: usize = 10;

    pub fn new(limit: usize, offset: usize) -> Self {
        Self { limit, offset }
    }

    /// A page large enough to hold every row.
    pub fn all() -> Self {
        Self::new(usize::MAX, 0)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LIMIT, 0)
    }
}

/// Relational persistence for users, goals and donations.
pub trait LedgerStore: Send + Sync {
    /// Runs `f` inside one atomic unit of work.
    ///
    /// The unit of work commits when `f` returns `Ok`. An `Err` from `f`, or a
    /// panic, rolls back every write `f` made.
    ///
    /// # Errors
    ///
    /// Whatever `f` returns, or the store's failure to open or commit the
    /// unit of work.
    fn transact<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn UnitOfWork) -> Result<T, E>,
        E: From<StoreError>;

    fn create_user(&self, new_user: NewUser) -> Result<User, StoreError>;

    fn create_goal(&self, new_goal: NewGoal) -> Result<Goal, StoreError>;

    /// Opens or closes a goal for donations.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the goal does not exist.
    fn set_goal_active(&self, goal_id: GoalId, is_active: bool) -> Result<Goal, StoreError>;

    fn user(&self, user_id: UserId) -> Result<Option<User>, StoreError>;

    fn goal(&self, goal_id: GoalId) -> Result<Option<Goal>, StoreError>;

    /// All users in id order.
    fn users(&self) -> Result<Vec<User>, StoreError>;

    /// All goals in id order.
    fn goals(&self) -> Result<Vec<Goal>, StoreError>;

    fn donation(&self, donation_id: DonationId) -> Result<Option<Donation>, StoreError>;

    /// Committed donations in commit order.
    fn donations(&self, filter: DonationFilter, page: Page) -> Result<Vec<Donation>, StoreError>;

    /// Sum of all committed donation amounts for a goal.
    fn donation_total(&self, goal_id: GoalId) -> Result<Amount, StoreError>;
}

/// One atomic read-modify-write scope, handed out by [`LedgerStore::transact`].
pub trait UnitOfWork {
    /// Reads and locks a goal row until the unit of work ends.
    fn lock_goal(&mut self, goal_id: GoalId) -> Result<Option<Goal>, StoreError>;

    /// Reads and locks a user row until the unit of work ends.
    fn lock_user(&mut self, user_id: UserId) -> Result<Option<User>, StoreError>;

    /// Atomically subtracts `amount` from the user's balance if it is covered.
    ///
    /// Returns the updated user, or `None` when the balance is insufficient
    /// (or the user does not exist); nothing is written in that case.
    fn debit_balance(&mut self, user_id: UserId, amount: Amount)
    -> Result<Option<User>, StoreError>;

    /// Atomically adds `amount` to the goal's stored collected amount.
    fn credit_collected(&mut self, goal_id: GoalId, amount: Amount) -> Result<Goal, StoreError>;

    /// Inserts a donation, assigning its id and timestamp.
    ///
    /// # Errors
    ///
    /// [`StoreError::DuplicateKey`] if another donation holds the same
    /// idempotency key, committed or not.
    fn insert_donation(&mut self, new_donation: NewDonation) -> Result<Donation, StoreError>;

    /// Finds a committed donation by idempotency key.
    fn find_by_idempotency_key(
        &mut self,
        key: &IdempotencyKey,
    ) -> Result<Option<Donation>, StoreError>;

    /// Re-reads a goal as seen from inside this unit of work.
    fn goal(&mut self, goal_id: GoalId) -> Result<Option<Goal>, StoreError>;

    /// Re-reads a user as seen from inside this unit of work.
    fn user(&mut self, user_id: UserId) -> Result<Option<User>, StoreError>;

    /// Sum of donation amounts for a goal, including this unit of work's
    /// own inserts.
    fn donation_total(&mut self, goal_id: GoalId) -> Result<Amount, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn goals_order_before_users() {
        assert!(RowKey::Goal(GoalId(1_000)) < RowKey::User(UserId(1)));
        assert!(RowKey::Goal(GoalId(1)) < RowKey::Goal(GoalId(2)));
        assert!(RowKey::User(UserId(1)) < RowKey::User(UserId(2)));
    }

    #[test]
    fn lock_sequence_accepts_ascending_keys() {
        let mut sequence = LockSequence::default();
        sequence.acquire(RowKey::Goal(GoalId(3)), false).unwrap();
        sequence.acquire(RowKey::Goal(GoalId(4)), false).unwrap();
        sequence.acquire(RowKey::User(UserId(1)), false).unwrap();
    }

    #[test]
    fn lock_sequence_rejects_goal_after_user() {
        let mut sequence = LockSequence::default();
        sequence.acquire(RowKey::User(UserId(1)), false).unwrap();
        assert_eq!(
            sequence.acquire(RowKey::Goal(GoalId(1)), false),
            Err(StoreError::LockOrder {
                held: RowKey::User(UserId(1)),
                requested: RowKey::Goal(GoalId(1)),
            })
        );
    }

    #[test]
    fn lock_sequence_allows_rows_already_held() {
        let mut sequence = LockSequence::default();
        sequence.acquire(RowKey::Goal(GoalId(1)), false).unwrap();
        sequence.acquire(RowKey::User(UserId(1)), false).unwrap();
        sequence.acquire(RowKey::Goal(GoalId(1)), true).unwrap();
    }

    #[test]
    fn default_page_matches_listing_default() {
        assert_eq!(Page::default(), Page::new(10, 0));
    }
}
