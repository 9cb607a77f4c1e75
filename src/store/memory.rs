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

//! In-process ledger store.
//!
//! Every user and goal row sits behind its own [`parking_lot::Mutex`] inside a
//! [`DashMap`]. A unit of work locks rows with a timeout and keeps them locked
//! until it ends, writing in place and remembering each row's before-image.
//! Rollback restores the before-images while the locks are still held, so no
//! other thread can observe an uncommitted value.

use crate::base::{Amount, DonationId, GoalId, IdempotencyKey, UserId};
use crate::donation::{Donation, NewDonation};
use crate::donation_log::DonationLog;
use crate::error::StoreError;
use crate::goal::{Goal, NewGoal};
use crate::store::{DonationFilter, LedgerStore, LockSequence, Page, RowKey, UnitOfWork};
use crate::user::{NewUser, User};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{ArcMutexGuard, Mutex, RawMutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

type Row<T> = Arc<Mutex<T>>;

/// Ledger store held entirely in memory.
#[derive(Debug)]
pub struct MemoryStore {
    users: DashMap<UserId, Row<User>>,
    goals: DashMap<GoalId, Row<Goal>>,
    donations: DonationLog,
    next_user_id: AtomicI64,
    next_goal_id: AtomicI64,
    next_donation_id: AtomicI64,
    /// How long to wait for a contended row lock.
    lock_timeout: Duration,
}

impl MemoryStore {
    pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

    pub fn new() -> Self {
        Self::with_lock_timeout(Self::DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            users: DashMap::new(),
            goals: DashMap::new(),
            donations: DonationLog::new(),
            next_user_id: AtomicI64::new(1),
            next_goal_id: AtomicI64::new(1),
            next_donation_id: AtomicI64::new(1),
            lock_timeout,
        }
    }

    fn goal_row(&self, goal_id: GoalId) -> Option<Row<Goal>> {
        self.goals.get(&goal_id).map(|row| Arc::clone(&row))
    }

    fn user_row(&self, user_id: UserId) -> Option<Row<User>> {
        self.users.get(&user_id).map(|row| Arc::clone(&row))
    }

    /// Reads a committed row, waiting out any unit of work that holds it.
    fn read<T: Clone>(&self, row: &Row<T>) -> Result<T, StoreError> {
        row.try_lock_for(self.lock_timeout)
            .map(|guard| (*guard).clone())
            .ok_or(StoreError::LockTimeout)
    }

    fn lock<T>(&self, row: &Row<T>) -> Result<ArcMutexGuard<RawMutex, T>, StoreError> {
        row.try_lock_arc_for(self.lock_timeout)
            .ok_or(StoreError::LockTimeout)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Opens a unit of work that rolls back unless [`MemoryUnitOfWork::commit`]
    /// is called.
    pub fn begin(&self) -> MemoryUnitOfWork<'_> {
        MemoryUnitOfWork {
            store: self,
            goals: HashMap::new(),
            users: HashMap::new(),
            sequence: LockSequence::default(),
            pending: Vec::new(),
            committed: false,
        }
    }
}

impl LedgerStore for MemoryStore {
    fn transact<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn UnitOfWork) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut uow = self.begin();
        let value = f(&mut uow)?;
        uow.commit();
        Ok(value)
    }

    fn create_user(&self, new_user: NewUser) -> Result<User, StoreError> {
        new_user.check()?;
        let user = User {
            id: UserId(self.next_user_id.fetch_add(1, Ordering::SeqCst)),
            name: new_user.name,
            balance: new_user.balance,
            created_at: Utc::now(),
        };
        self.users
            .insert(user.id, Arc::new(Mutex::new(user.clone())));
        Ok(user)
    }

    fn create_goal(&self, new_goal: NewGoal) -> Result<Goal, StoreError> {
        new_goal.check()?;
        let goal = Goal {
            id: GoalId(self.next_goal_id.fetch_add(1, Ordering::SeqCst)),
            title: new_goal.title,
            description: new_goal.description,
            target_amount: new_goal.target_amount,
            collected_amount: Amount::ZERO,
            is_active: new_goal.is_active,
            created_at: Utc::now(),
        };
        self.goals
            .insert(goal.id, Arc::new(Mutex::new(goal.clone())));
        Ok(goal)
    }

    fn set_goal_active(&self, goal_id: GoalId, is_active: bool) -> Result<Goal, StoreError> {
        let row = self.goal_row(goal_id).ok_or(StoreError::NotFound)?;
        let mut goal = self.lock(&row)?;
        goal.is_active = is_active;
        Ok((*goal).clone())
    }

    fn user(&self, user_id: UserId) -> Result<Option<User>, StoreError> {
        self.user_row(user_id)
            .map(|row| self.read(&row))
            .transpose()
    }

    fn goal(&self, goal_id: GoalId) -> Result<Option<Goal>, StoreError> {
        self.goal_row(goal_id)
            .map(|row| self.read(&row))
            .transpose()
    }

    fn users(&self) -> Result<Vec<User>, StoreError> {
        let rows: Vec<Row<User>> = self.users.iter().map(|row| Arc::clone(&row)).collect();
        let mut users = rows
            .iter()
            .map(|row| self.read(row))
            .collect::<Result<Vec<_>, _>>()?;
        users.sort_by_key(|user| user.id);
        Ok(users)
    }

    fn goals(&self) -> Result<Vec<Goal>, StoreError> {
        let rows: Vec<Row<Goal>> = self.goals.iter().map(|row| Arc::clone(&row)).collect();
        let mut goals = rows
            .iter()
            .map(|row| self.read(row))
            .collect::<Result<Vec<_>, _>>()?;
        goals.sort_by_key(|goal| goal.id);
        Ok(goals)
    }

    fn donation(&self, donation_id: DonationId) -> Result<Option<Donation>, StoreError> {
        Ok(self.donations.get(donation_id).map(|donation| (*donation).clone()))
    }

    fn donations(&self, filter: DonationFilter, page: Page) -> Result<Vec<Donation>, StoreError> {
        Ok(self.donations.list(filter, page))
    }

    fn donation_total(&self, goal_id: GoalId) -> Result<Amount, StoreError> {
        self.donations
            .total_for_goal(goal_id)
            .ok_or_else(|| StoreError::Constraint("donation total overflow".into()))
    }
}

/// A locked row plus the value it had when the unit of work first locked it.
struct LockedRow<T> {
    guard: ArcMutexGuard<RawMutex, T>,
    before: T,
}

impl<T: Clone> LockedRow<T> {
    fn new(guard: ArcMutexGuard<RawMutex, T>) -> Self {
        let before = (*guard).clone();
        Self { guard, before }
    }

    fn restore(&mut self) {
        *self.guard = self.before.clone();
    }
}

/// Unit of work over a [`MemoryStore`].
pub struct MemoryUnitOfWork<'a> {
    store: &'a MemoryStore,
    goals: HashMap<GoalId, LockedRow<Goal>>,
    users: HashMap<UserId, LockedRow<User>>,
    sequence: LockSequence,
    /// Inserted donations, published to the log on commit.
    pending: Vec<Donation>,
    committed: bool,
}

impl MemoryUnitOfWork<'_> {
    /// Makes every write visible atomically and releases all row locks.
    pub fn commit(mut self) {
        // Publish while the row locks are still held
        for donation in self.pending.drain(..) {
            self.store.donations.append(donation);
        }
        self.committed = true;
    }

    fn locked_goal(&mut self, goal_id: GoalId) -> Result<Option<&mut LockedRow<Goal>>, StoreError> {
        let held = self.goals.contains_key(&goal_id);
        self.sequence.acquire(RowKey::Goal(goal_id), held)?;
        if !held {
            let Some(row) = self.store.goal_row(goal_id) else {
                return Ok(None);
            };
            let guard = self.store.lock(&row)?;
            self.goals.insert(goal_id, LockedRow::new(guard));
        }
        Ok(self.goals.get_mut(&goal_id))
    }

    fn locked_user(&mut self, user_id: UserId) -> Result<Option<&mut LockedRow<User>>, StoreError> {
        let held = self.users.contains_key(&user_id);
        self.sequence.acquire(RowKey::User(user_id), held)?;
        if !held {
            let Some(row) = self.store.user_row(user_id) else {
                return Ok(None);
            };
            let guard = self.store.lock(&row)?;
            self.users.insert(user_id, LockedRow::new(guard));
        }
        Ok(self.users.get_mut(&user_id))
    }
}

impl UnitOfWork for MemoryUnitOfWork<'_> {
    fn lock_goal(&mut self, goal_id: GoalId) -> Result<Option<Goal>, StoreError> {
        Ok(self.locked_goal(goal_id)?.map(|row| (*row.guard).clone()))
    }

    fn lock_user(&mut self, user_id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.locked_user(user_id)?.map(|row| (*row.guard).clone()))
    }

    fn debit_balance(
        &mut self,
        user_id: UserId,
        amount: Amount,
    ) -> Result<Option<User>, StoreError> {
        let Some(row) = self.locked_user(user_id)? else {
            return Ok(None);
        };
        if !row.guard.debit(amount) {
            return Ok(None);
        }
        Ok(Some((*row.guard).clone()))
    }

    fn credit_collected(&mut self, goal_id: GoalId, amount: Amount) -> Result<Goal, StoreError> {
        let row = self.locked_goal(goal_id)?.ok_or(StoreError::NotFound)?;
        row.guard.credit(amount)?;
        Ok((*row.guard).clone())
    }

    fn insert_donation(&mut self, new_donation: NewDonation) -> Result<Donation, StoreError> {
        if !new_donation.amount.is_positive() {
            return Err(StoreError::Constraint("donation amount must be positive".into()));
        }
        if !self.store.goals.contains_key(&new_donation.goal_id) {
            return Err(StoreError::Constraint(format!(
                "goal {} does not exist",
                new_donation.goal_id
            )));
        }
        if let Some(user_id) = new_donation.donor.user_id()
            && !self.store.users.contains_key(&user_id)
        {
            return Err(StoreError::Constraint(format!("user {user_id} does not exist")));
        }

        let donation_id = DonationId(self.store.next_donation_id.fetch_add(1, Ordering::SeqCst));
        if let Some(key) = &new_donation.idempotency_key {
            self.store.donations.reserve(key, donation_id)?;
        }
        let donation = Donation {
            id: donation_id,
            donor: new_donation.donor,
            goal_id: new_donation.goal_id,
            amount: new_donation.amount,
            idempotency_key: new_donation.idempotency_key,
            created_at: Utc::now(),
        };
        self.pending.push(donation.clone());
        Ok(donation)
    }

    fn find_by_idempotency_key(
        &mut self,
        key: &IdempotencyKey,
    ) -> Result<Option<Donation>, StoreError> {
        if let Some(pending) = self
            .pending
            .iter()
            .find(|donation| donation.idempotency_key.as_ref() == Some(key))
        {
            return Ok(Some(pending.clone()));
        }
        Ok(self
            .store
            .donations
            .find_by_key(key)
            .map(|donation| (*donation).clone()))
    }

    fn goal(&mut self, goal_id: GoalId) -> Result<Option<Goal>, StoreError> {
        match self.goals.get(&goal_id) {
            Some(row) => Ok(Some((*row.guard).clone())),
            None => self.store.goal(goal_id),
        }
    }

    fn user(&mut self, user_id: UserId) -> Result<Option<User>, StoreError> {
        match self.users.get(&user_id) {
            Some(row) => Ok(Some((*row.guard).clone())),
            None => self.store.user(user_id),
        }
    }

    fn donation_total(&mut self, goal_id: GoalId) -> Result<Amount, StoreError> {
        let committed = self.store.donation_total(goal_id)?;
        self.pending
            .iter()
            .filter(|donation| donation.goal_id == goal_id)
            .try_fold(committed, |total, donation| total.checked_add(donation.amount))
            .ok_or_else(|| StoreError::Constraint("donation total overflow".into()))
    }
}

impl Drop for MemoryUnitOfWork<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for row in self.goals.values_mut() {
            row.restore();
        }
        for row in self.users.values_mut() {
            row.restore();
        }
        for donation in &self.pending {
            if let Some(key) = &donation.idempotency_key {
                self.store.donations.release(key, donation.id);
            }
        }
        if !self.pending.is_empty() || !self.goals.is_empty() {
            tracing::trace!(
                goals = self.goals.len(),
                users = self.users.len(),
                donations = self.pending.len(),
                "rolled back unit of work"
            );
        }
    }
}
