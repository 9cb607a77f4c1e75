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

//! Thread-safe, append-only donation table with idempotency-key deduplication.
//!
//! Keys are claimed in two steps. A unit of work *reserves* a key when it
//! inserts a donation, which makes concurrent inserts with the same key fail
//! immediately. On commit the reservation becomes a committed entry; on
//! rollback it is released.

use crate::base::{Amount, DonationId, GoalId, IdempotencyKey};
use crate::donation::Donation;
use crate::error::StoreError;
use crate::store::{DonationFilter, Page};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeySlot {
    Reserved(DonationId),
    Committed(DonationId),
}

/// Committed donations in commit order.
///
/// Combines a [`DashMap`] for O(1) lookup by id and key with an ordered id
/// list for listing. Rows are never updated or removed once appended.
#[derive(Debug, Default)]
pub struct DonationLog {
    /// Committed donations indexed by id.
    donations: DashMap<DonationId, Arc<Donation>>,

    /// Ids in commit order.
    order: RwLock<Vec<DonationId>>,

    keys: DashMap<IdempotencyKey, KeySlot>,

    /// Running committed total per goal; `None` once the sum overflowed.
    totals: DashMap<GoalId, Option<Amount>>,
}

impl DonationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `key` for the uncommitted donation `donation_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateKey`] if the key is already reserved or
    /// committed.
    pub(crate) fn reserve(
        &self,
        key: &IdempotencyKey,
        donation_id: DonationId,
    ) -> Result<(), StoreError> {
        // Entry API makes the check-and-claim atomic
        match self.keys.entry(key.clone()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateKey),
            Entry::Vacant(entry) => {
                entry.insert(KeySlot::Reserved(donation_id));
                Ok(())
            }
        }
    }

    /// Drops a reservation made by a unit of work that rolled back.
    pub(crate) fn release(&self, key: &IdempotencyKey, donation_id: DonationId) {
        self.keys
            .remove_if(key, |_, slot| *slot == KeySlot::Reserved(donation_id));
    }

    /// Appends a committed donation.
    pub(crate) fn append(&self, donation: Donation) {
        let donation_id = donation.id;
        if let Some(key) = &donation.idempotency_key {
            self.keys.insert(key.clone(), KeySlot::Committed(donation_id));
        }
        let amount = donation.amount;
        self.totals
            .entry(donation.goal_id)
            .and_modify(|total| *total = total.and_then(|total| total.checked_add(amount)))
            .or_insert(Some(amount));
        // Index before publishing the id so listings never see a dangling id
        self.donations.insert(donation_id, Arc::new(donation));
        self.order.write().push(donation_id);
    }

    pub fn get(&self, donation_id: DonationId) -> Option<Arc<Donation>> {
        self.donations.get(&donation_id).map(|entry| Arc::clone(&entry))
    }

    /// Looks up a committed donation by key. Reservations are invisible.
    pub fn find_by_key(&self, key: &IdempotencyKey) -> Option<Arc<Donation>> {
        match self.keys.get(key).map(|slot| *slot) {
            Some(KeySlot::Committed(donation_id)) => self.get(donation_id),
            _ => None,
        }
    }

    pub fn list(&self, filter: DonationFilter, page: Page) -> Vec<Donation> {
        let order = self.order.read();
        order
            .iter()
            .filter_map(|donation_id| self.get(*donation_id))
            .filter(|donation| filter.accepts(donation))
            .skip(page.offset)
            .take(page.limit)
            .map(|donation| (*donation).clone())
            .collect()
    }

    /// Sum of committed amounts for a goal, kept up to date by `append`.
    ///
    /// Returns `None` if the sum does not fit in an [`Amount`].
    pub fn total_for_goal(&self, goal_id: GoalId) -> Option<Amount> {
        self.totals
            .get(&goal_id)
            .map_or(Some(Amount::ZERO), |total| *total)
    }

    pub fn len(&self) -> usize {
        self.donations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.donations.is_empty()
    }
}
