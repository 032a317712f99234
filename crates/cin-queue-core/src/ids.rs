// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Identifier newtypes.
//!
//! All identifiers are database-assigned 64-bit integers. The newtypes keep an
//! integration id from being passed where a datum stream id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

macro_rules! i64_id {
	($(#[$meta:meta])* $name:ident) => {
		$(#[$meta])*
		#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(transparent)]
		pub struct $name(pub i64);

		impl $name {
			pub fn get(&self) -> i64 {
				self.0
			}
		}

		impl From<i64> for $name {
			fn from(value: i64) -> Self {
				Self(value)
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, "{}", self.0)
			}
		}

		impl FromStr for $name {
			type Err = ParseIntError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Ok(Self(s.parse()?))
			}
		}
	};
}

i64_id!(
	/// Owner of configuration and tasks.
	UserId
);

i64_id!(
	/// A cloud integration (credentials plus service endpoint).
	IntegrationId
);

i64_id!(
	/// Links a datum stream to its integration.
	MappingId
);

i64_id!(
	/// A datum stream. This is the resource that group exclusivity is keyed on.
	DatumStreamId
);

i64_id!(
	/// Generated identifier of a rake task.
	TaskId
);
