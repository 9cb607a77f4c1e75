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

//! Per-donation ceilings.
//!
//! Limits are policy, not ledger invariants: callers check them before handing
//! a request to the [`Engine`](crate::Engine), which never consults them.

use crate::base::Amount;
use crate::donation::{DonationRequest, Donor};
use crate::error::DonationError;
use serde::Deserialize;

/// Largest single donation accepted, per donor kind. `None` disables a ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DonationLimits {
    pub max_attributed: Option<Amount>,
    pub max_anonymous: Option<Amount>,
}

impl DonationLimits {
    pub const DEFAULT_MAX_ATTRIBUTED: Amount = Amount(5_000_000);
    pub const DEFAULT_MAX_ANONYMOUS: Amount = Amount(1_000_000);

    pub fn unlimited() -> Self {
        Self {
            max_attributed: None,
            max_anonymous: None,
        }
    }

    /// Returns the ceiling that applies to `donor`, if any.
    pub fn limit_for(&self, donor: &Donor) -> Option<Amount> {
        match donor {
            Donor::Attributed(_) => self.max_attributed,
            Donor::Anonymous => self.max_anonymous,
        }
    }

    /// # Errors
    ///
    /// [`DonationError::LimitExceeded`] when the request is above its ceiling.
    pub fn check(&self, request: &DonationRequest) -> Result<(), DonationError> {
        match self.limit_for(&request.donor) {
            Some(limit) if request.amount > limit => Err(DonationError::LimitExceeded {
                limit,
                requested: request.amount,
            }),
            _ => Ok(()),
        }
    }
}

impl Default for DonationLimits {
    fn default() -> Self {
        Self {
            max_attributed: Some(Self::DEFAULT_MAX_ATTRIBUTED),
            max_anonymous: Some(Self::DEFAULT_MAX_ANONYMOUS),
        }
    }
}
