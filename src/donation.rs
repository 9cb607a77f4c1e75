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

//! Donation records and requests.
//!
//! A donation is either attributed to a user, whose balance funds it, or
//! anonymous and funded outside the ledger. [`Donor`] keeps the two cases
//! apart so a user reference and an anonymity flag can never disagree. The
//! flag only exists in the external form, and [`Donor::from_parts`] is the
//! single place where that form is parsed.

use crate::base::{Amount, DonationId, GoalId, IdempotencyKey, UserId};
use crate::error::DonationError;
use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Who funds a donation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Donor {
    /// Funded from the user's balance.
    Attributed(UserId),
    /// Funded externally, e.g. by a settled card payment.
    Anonymous,
}

impl Donor {
    /// Parses the `(user_id, is_anonymous)` pair used on the wire and in SQL.
    ///
    /// # Errors
    ///
    /// Returns [`DonationError::AnonymityMismatch`] when a user is given for an
    /// anonymous donation, or none is given for an attributed one.
    pub fn from_parts(user_id: Option<UserId>, is_anonymous: bool) -> Result<Self, DonationError> {
        match (user_id, is_anonymous) {
            (Some(user_id), false) => Ok(Donor::Attributed(user_id)),
            (None, true) => Ok(Donor::Anonymous),
            _ => Err(DonationError::AnonymityMismatch),
        }
    }

    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Donor::Attributed(user_id) => Some(*user_id),
            Donor::Anonymous => None,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Donor::Anonymous)
    }
}

impl fmt::Display for Donor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Donor::Attributed(user_id) => write!(f, "user {user_id}"),
            Donor::Anonymous => f.write_str("anonymous"),
        }
    }
}

/// A committed donation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Donation {
    pub id: DonationId,
    pub donor: Donor,
    pub goal_id: GoalId,
    pub amount: Amount,
    pub idempotency_key: Option<IdempotencyKey>,
    pub created_at: DateTime<Utc>,
}

impl Donation {
    pub fn user_id(&self) -> Option<UserId> {
        self.donor.user_id()
    }

    pub fn is_anonymous(&self) -> bool {
        self.donor.is_anonymous()
    }
}

impl Serialize for Donation {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("Donation", 7)?;
        state.serialize_field("id", &self.id)?;
        state.serialize_field("user_id", &self.user_id())?;
        state.serialize_field("goal_id", &self.goal_id)?;
        state.serialize_field("amount", &self.amount)?;
        state.serialize_field("is_anonymous", &self.is_anonymous())?;
        state.serialize_field("idempotency_key", &self.idempotency_key)?;
        state.serialize_field("created_at", &self.created_at)?;
        state.end()
    }
}

#[derive(Deserialize)]
struct DonationRecord {
    id: DonationId,
    user_id: Option<UserId>,
    goal_id: GoalId,
    amount: Amount,
    is_anonymous: bool,
    #[serde(default)]
    idempotency_key: Option<IdempotencyKey>,
    created_at: DateTime<Utc>,
}

impl<'de> Deserialize<'de> for Donation {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let record = DonationRecord::deserialize(deserializer)?;
        let donor = Donor::from_parts(record.user_id, record.is_anonymous).map_err(de::Error::custom)?;
        Ok(Donation {
            id: record.id,
            donor,
            goal_id: record.goal_id,
            amount: record.amount,
            idempotency_key: record.idempotency_key,
            created_at: record.created_at,
        })
    }
}

/// Insert parameters handed to the store. Id and timestamp are assigned there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDonation {
    pub donor: Donor,
    pub goal_id: GoalId,
    pub amount: Amount,
    pub idempotency_key: Option<IdempotencyKey>,
}

/// A request to move `amount` into a goal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DonationRequest {
    pub goal_id: GoalId,
    pub donor: Donor,
    pub amount: Amount,
    pub idempotency_key: Option<IdempotencyKey>,
}

impl DonationRequest {
    pub fn attributed(goal_id: GoalId, user_id: UserId, amount: Amount) -> Self {
        Self {
            goal_id,
            donor: Donor::Attributed(user_id),
            amount,
            idempotency_key: None,
        }
    }

    pub fn anonymous(goal_id: GoalId, amount: Amount) -> Self {
        Self {
            goal_id,
            donor: Donor::Anonymous,
            amount,
            idempotency_key: None,
        }
    }

    /// Builds a request from the flat `(goal, user?, amount, anonymous?)` form.
    pub fn from_parts(
        goal_id: GoalId,
        user_id: Option<UserId>,
        amount: Amount,
        is_anonymous: bool,
    ) -> Result<Self, DonationError> {
        Ok(Self {
            goal_id,
            donor: Donor::from_parts(user_id, is_anonymous)?,
            amount,
            idempotency_key: None,
        })
    }

    pub fn with_idempotency_key(mut self, key: IdempotencyKey) -> Self {
        self.idempotency_key = Some(key);
        self
    }

    /// Returns `true` if `donation` records exactly this request.
    pub(crate) fn matches(&self, donation: &Donation) -> bool {
        donation.goal_id == self.goal_id
            && donation.donor == self.donor
            && donation.amount == self.amount
    }

    pub(crate) fn to_new_donation(&self) -> NewDonation {
        NewDonation {
            donor: self.donor,
            goal_id: self.goal_id,
            amount: self.amount,
            idempotency_key: self.idempotency_key.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn donation(donor: Donor) -> Donation {
        Donation {
            id: DonationId(11),
            donor,
            goal_id: GoalId(2),
            amount: Amount(2500),
            idempotency_key: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn from_parts_accepts_consistent_pairs() {
        assert_eq!(
            Donor::from_parts(Some(UserId(4)), false),
            Ok(Donor::Attributed(UserId(4)))
        );
        assert_eq!(Donor::from_parts(None, true), Ok(Donor::Anonymous));
    }

    #[test]
    fn from_parts_rejects_mixed_pairs() {
        assert_eq!(
            Donor::from_parts(Some(UserId(4)), true),
            Err(DonationError::AnonymityMismatch)
        );
        assert_eq!(
            Donor::from_parts(None, false),
            Err(DonationError::AnonymityMismatch)
        );
    }

    #[test]
    fn serializes_donor_as_flat_pair() {
        let json = serde_json::to_value(donation(Donor::Attributed(UserId(5)))).unwrap();
        assert_eq!(json["user_id"], 5);
        assert_eq!(json["is_anonymous"], false);

        let json = serde_json::to_value(donation(Donor::Anonymous)).unwrap();
        assert!(json["user_id"].is_null());
        assert_eq!(json["is_anonymous"], true);
    }

    #[test]
    fn deserialize_rejects_mismatched_pair() {
        let json = r#"{"id":1,"user_id":3,"goal_id":1,"amount":10,
                       "is_anonymous":true,"created_at":"2025-01-01T00:00:00Z"}"#;
        let result: Result<Donation, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn deserialize_accepts_serialized_form() {
        let original = donation(Donor::Attributed(UserId(9)));
        let json = serde_json::to_string(&original).unwrap();
        let parsed: Donation = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn request_matches_only_identical_donation() {
        let request = DonationRequest::attributed(GoalId(2), UserId(5), Amount(2500));
        assert!(request.matches(&donation(Donor::Attributed(UserId(5)))));
        assert!(!request.matches(&donation(Donor::Attributed(UserId(6)))));
        assert!(!request.matches(&donation(Donor::Anonymous)));
    }

    #[test]
    fn donor_display() {
        assert_eq!(Donor::Attributed(UserId(3)).to_string(), "user 3");
        assert_eq!(Donor::Anonymous.to_string(), "anonymous");
    }
}
