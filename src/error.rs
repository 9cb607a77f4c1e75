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

//! Error types for donation processing and the ledger store.

use crate::base::{Amount, GoalId, IdempotencyKey, UserId};
use crate::store::RowKey;
use thiserror::Error;

/// Donation processing errors.
///
/// Every variant is reported only after the unit of work has been rolled
/// back, so none of them leaves a partial effect behind.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DonationError {
    /// Amount is zero or negative
    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    #[error("goal {0} not found")]
    GoalNotFound(GoalId),

    #[error("user {0} not found")]
    UserNotFound(UserId),

    /// Goal exists but no longer accepts donations
    #[error("cannot donate to inactive goal {0}")]
    GoalInactive(GoalId),

    #[error("insufficient balance: user {user_id} has {balance}, requested {requested}")]
    InsufficientBalance {
        user_id: UserId,
        balance: Amount,
        requested: Amount,
    },

    /// A user reference and the anonymity flag disagree
    #[error("donor reference does not match anonymity flag")]
    AnonymityMismatch,

    /// Rejected by the caller-side policy before reaching the engine
    #[error("donation amount {requested} exceeds maximum limit {limit}")]
    LimitExceeded { limit: Amount, requested: Amount },

    /// Idempotency key was already used for a different donation
    #[error("idempotency key {0} already used for a different donation")]
    IdempotencyConflict(IdempotencyKey),

    /// A row lock could not be acquired within the configured timeout
    #[error("transaction timed out waiting for a lock")]
    TransactionTimeout,

    /// A concurrent transaction claimed the same unique value first
    #[error("transaction aborted by a concurrent write conflict")]
    WriteConflict,

    #[error("transaction aborted: {0}")]
    TransactionAborted(String),
}

impl DonationError {
    /// Returns `true` when retrying the whole donation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransactionTimeout | Self::WriteConflict)
    }
}

/// Ledger store errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("timed out waiting for a row lock")]
    LockTimeout,

    /// Row locks must be taken in ascending [`RowKey`] order
    #[error("lock order violation: requested {requested:?} while holding {held:?}")]
    LockOrder { held: RowKey, requested: RowKey },

    /// Idempotency key is already reserved or committed
    #[error("duplicate idempotency key")]
    DuplicateKey,

    #[error("row not found")]
    NotFound,

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("cannot decode stored row: {0}")]
    Decode(String),
}

impl From<StoreError> for DonationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::LockTimeout => DonationError::TransactionTimeout,
            StoreError::DuplicateKey => DonationError::WriteConflict,
            other => DonationError::TransactionAborted(other.to_string()),
        }
    }
}
