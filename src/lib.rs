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

//! # Donation Ledger
//!
//! This library moves money from donors into fundraising goals. A donation is
//! either attributed to a user and paid from their balance, or anonymous and
//! paid outside the ledger. Each donation debits, records and credits in one
//! atomic unit of work, so concurrent donors never lose or double-count funds.
//!
//! ## Core Components
//!
//! - [`Engine`]: runs donations against a store and retries transient aborts
//! - [`LedgerStore`]: users, goals and donations, in memory or in SQLite
//! - [`DonationRequest`] / [`DonationReceipt`]: what goes in and comes out
//! - [`DonationError`]: why a donation was refused
//!
//! ## Example
//!
//! ```
//! use donation_ledger::{Amount, DonationRequest, Engine, LedgerStore, NewGoal, NewUser};
//!
//! let engine = Engine::default();
//! let goal = engine
//!     .store()
//!     .create_goal(NewGoal::new("Clean water").with_target(Amount(10_000)))
//!     .unwrap();
//! let user = engine.store().create_user(NewUser::new("Ada")).unwrap();
//!
//! let receipt = engine
//!     .donate(DonationRequest::attributed(goal.id, user.id, Amount(2_500)))
//!     .unwrap();
//! assert_eq!(receipt.goal.collected_amount, Amount(2_500));
//! assert_eq!(receipt.user.unwrap().balance, Amount(997_500));
//!
//! let receipt = engine
//!     .donate(DonationRequest::anonymous(goal.id, Amount(2_500)))
//!     .unwrap();
//! assert_eq!(receipt.goal.collected_amount, Amount(5_000));
//! assert!(receipt.user.is_none());
//! ```

mod base;
pub mod config;
pub mod conservation;
mod donation;
mod donation_log;
mod engine;
pub mod error;
mod goal;
pub mod limits;
pub mod receipt;
pub mod store;
mod user;
pub mod validate;

pub use base::{Amount, DonationId, GoalId, IdempotencyKey, UserId};
pub use config::Settings;
pub use conservation::ConservationReport;
pub use donation::{Donation, DonationRequest, Donor, NewDonation};
pub use donation_log::DonationLog;
pub use engine::Engine;
pub use error::{DonationError, StoreError};
pub use goal::{Goal, NewGoal};
pub use limits::DonationLimits;
pub use receipt::DonationReceipt;
pub use store::{
    DonationFilter, LedgerStore, MemoryStore, Page, RowKey, SqliteStore, UnitOfWork,
};
pub use user::{NewUser, User};
