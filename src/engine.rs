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

//! Donation transaction engine.
//!
//! The [`Engine`] runs each donation as a single [`UnitOfWork`]:
//!
//! 1. Lock the goal row, then the donor's user row (attributed donations only).
//! 2. Validate amount, goal, activity, user and balance on the locked rows.
//! 3. Debit the user with a compare-and-subtract.
//! 4. Insert the donation record.
//! 5. Add the amount to the goal's stored `collected_amount`.
//! 6. Re-read the goal and user, commit, and assemble the receipt.
//!
//! Any error ends the unit of work in a rollback of every step including
//! the insert.
//!
//! # Thread Safety
//!
//! The engine holds no per-call state. Share it by reference across threads;
//! concurrent donations to the same goal serialize on the goal row lock.

use crate::base::{Amount, GoalId, UserId};
use crate::config::EngineConfig;
use crate::conservation::ConservationReport;
use crate::donation::{Donation, DonationRequest, Donor};
use crate::error::DonationError;
use crate::goal::Goal;
use crate::receipt::{self, DonationReceipt};
use crate::store::{LedgerStore, MemoryStore, UnitOfWork};
use crate::user::User;
use crate::validate::{self, DonorSnapshot};
use std::thread;

/// Donation transaction engine over a [`LedgerStore`].
///
/// # Invariants
///
/// - A goal's `collected_amount` equals the sum of its committed donations.
/// - Attributed donations move exactly `amount` from the user's balance; no
///   balance ever goes negative.
/// - Anonymous donations never touch a user balance.
pub struct Engine<S = MemoryStore> {
    store: S,
    config: EngineConfig,
}

impl<S: LedgerStore> Engine<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    pub fn with_config(store: S, config: EngineConfig) -> Self {
        Engine { store, config }
    }

    /// The underlying store, for directory operations and listings.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn goal(&self, goal_id: GoalId) -> Result<Option<Goal>, DonationError> {
        Ok(self.store.goal(goal_id)?)
    }

    pub fn user(&self, user_id: UserId) -> Result<Option<User>, DonationError> {
        Ok(self.store.user(user_id)?)
    }

    /// Donates in the flat form used by request handlers.
    ///
    /// # Errors
    ///
    /// [`DonationError::AnonymityMismatch`] if `user_id` and `is_anonymous`
    /// disagree, otherwise as [`Engine::donate`].
    pub fn donate_to_goal(
        &self,
        goal_id: GoalId,
        user_id: Option<UserId>,
        amount: Amount,
        is_anonymous: bool,
    ) -> Result<DonationReceipt, DonationError> {
        self.donate(DonationRequest::from_parts(goal_id, user_id, amount, is_anonymous)?)
    }

    /// Atomically records a donation and moves its amount into the goal.
    ///
    /// Transient failures ([`DonationError::is_transient`]) are retried up to
    /// `max_retries` times with linear backoff.
    ///
    /// # Errors
    ///
    /// - [`DonationError::InvalidAmount`] - amount is zero or negative.
    /// - [`DonationError::GoalNotFound`] / [`DonationError::GoalInactive`].
    /// - [`DonationError::UserNotFound`] / [`DonationError::InsufficientBalance`].
    /// - [`DonationError::IdempotencyConflict`] - key reused for another donation.
    /// - [`DonationError::TransactionTimeout`] / [`DonationError::WriteConflict`] -
    ///   retries exhausted.
    /// - [`DonationError::TransactionAborted`] - any other store failure.
    pub fn donate(&self, request: DonationRequest) -> Result<DonationReceipt, DonationError> {
        let span = tracing::info_span!(
            "donate",
            goal = %request.goal_id,
            donor = %request.donor,
            amount = %request.amount,
        );
        let _entered = span.enter();

        if let Err(err) = validate::check_amount(request.amount) {
            tracing::debug!(%err, "donation rejected");
            return Err(err);
        }

        let mut attempt = 0;
        loop {
            match self.try_donate(&request) {
                Ok(receipt) => {
                    tracing::debug!(
                        donation = %receipt.donation.id,
                        collected = %receipt.goal.collected_amount,
                        replayed = receipt.replayed,
                        "donation committed"
                    );
                    return Ok(receipt);
                }
                Err(err) if err.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    tracing::warn!(%err, attempt, "retrying donation");
                    thread::sleep(self.config.retry_backoff(attempt));
                }
                Err(err) => {
                    tracing::debug!(%err, "donation rejected");
                    return Err(err);
                }
            }
        }
    }

    fn try_donate(&self, request: &DonationRequest) -> Result<DonationReceipt, DonationError> {
        self.store.transact(|uow| {
            if let Some(key) = &request.idempotency_key
                && let Some(existing) = uow.find_by_idempotency_key(key)?
            {
                if !request.matches(&existing) {
                    return Err(DonationError::IdempotencyConflict(key.clone()));
                }
                return Ok(snapshot(uow, existing)?.replayed());
            }

            // Goal before user: the global lock order
            let goal = uow.lock_goal(request.goal_id)?;
            let user = match request.donor {
                Donor::Attributed(user_id) => uow.lock_user(user_id)?,
                Donor::Anonymous => None,
            };

            let donor = match request.donor {
                Donor::Attributed(user_id) => DonorSnapshot::Attributed {
                    user_id,
                    user: user.as_ref(),
                },
                Donor::Anonymous => DonorSnapshot::Anonymous,
            };
            validate::check_donation(request.goal_id, goal.as_ref(), donor, request.amount)?;

            if let Donor::Attributed(user_id) = request.donor
                && uow.debit_balance(user_id, request.amount)?.is_none()
            {
                return Err(DonationError::InsufficientBalance {
                    user_id,
                    balance: user.map_or(Amount::ZERO, |user| user.balance),
                    requested: request.amount,
                });
            }

            let donation = uow.insert_donation(request.to_new_donation())?;
            uow.credit_collected(request.goal_id, request.amount)?;
            snapshot(uow, donation)
        })
    }

    /// Compares a goal's stored aggregate with the sum of its donations.
    ///
    /// Both values are read under the goal's row lock, so no donation can
    /// commit between the two reads.
    pub fn audit_goal(&self, goal_id: GoalId) -> Result<ConservationReport, DonationError> {
        let report = self.store.transact(|uow| {
            let goal = uow
                .lock_goal(goal_id)?
                .ok_or(DonationError::GoalNotFound(goal_id))?;
            let donated = uow.donation_total(goal_id)?;
            Ok::<_, DonationError>(ConservationReport::new(
                goal_id,
                goal.collected_amount,
                donated,
            ))
        })?;
        if !report.balanced {
            tracing::error!(
                goal = %goal_id,
                collected = %report.collected,
                donated = %report.donated,
                "goal aggregate does not match its donations"
            );
        }
        Ok(report)
    }
}

/// Reads the goal and donor rows a receipt reports, as seen by `uow`.
fn snapshot(uow: &mut dyn UnitOfWork, donation: Donation) -> Result<DonationReceipt, DonationError> {
    let goal = uow.goal(donation.goal_id)?.ok_or_else(|| {
        DonationError::TransactionAborted(format!("goal {} vanished", donation.goal_id))
    })?;
    let user = match donation.user_id() {
        Some(user_id) => uow.user(user_id)?,
        None => None,
    };
    receipt::assemble(donation, goal, user)
}

impl Default for Engine<MemoryStore> {
    fn default() -> Self {
        Self::new(MemoryStore::new())
    }
}
