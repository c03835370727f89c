//! Opaque identifiers used across the workspace.
//!
//! Auction, bid, event, transaction and settlement-request identifiers are
//! 128-bit values, globally unique within a process lifetime. They display
//! and serialize as 32 lowercase hex characters so that the event-log JSON
//! export is stable across processes.

use serde::{
    de,
    Deserialize,
    Deserializer,
    Serialize,
    Serializer,
};
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$docs:meta])* $name:ident) => {
        $(#[$docs])*
        #[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
        pub struct $name(Uuid);

        impl $name {
            #[must_use]
            pub fn random() -> Self {
                Self(Uuid::new_v4())
            }

            #[must_use]
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            #[must_use]
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.as_simple().fmt(f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(&self.0.as_simple())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = <std::borrow::Cow<'_, str>>::deserialize(deserializer)?;
                s.parse().map_err(de::Error::custom)
            }
        }
    };
}

define_id!(
    /// Identifies a single auction for its entire lifecycle.
    AuctionId
);
define_id!(
    /// Identifies a submitted bid.
    BidId
);
define_id!(
    /// Identifies an entry in the event log.
    EventId
);
define_id!(
    /// Identifies a settlement request flowing through the orchestrator.
    RequestId
);
define_id!(
    /// Identifies an atomic settlement transaction.
    TransactionId
);

/// A participant identity as registered with the engine.
///
/// Bidder identities are caller-assigned strings rather than generated ids;
/// tie-breaking rules compare them lexicographically.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BidderId(String);

impl BidderId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BidderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::borrow::Borrow<str> for BidderId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BidderId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for BidderId {
    fn from(value: String) -> Self {
        Self(value)
    }
}
