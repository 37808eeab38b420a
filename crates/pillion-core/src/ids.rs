//! Branded ID newtypes.
//!
//! The backend hands out numeric identifiers for rides and requests but the
//! broker frames carry them as numbers or strings depending on the producer.
//! Every identifier is normalised to its decimal string form and wrapped in a
//! distinct newtype so a ride ID can never be passed where a request ID is
//! expected.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing string value.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<u64> for $name {
            fn from(n: u64) -> Self {
                Self(n.to_string())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Identifier of a ride (a driver's trip, possibly shared).
    RideId
}

branded_id! {
    /// Identifier of a ride request or join request.
    RequestId
}

branded_id! {
    /// Identifier of an offer as assigned by the matching service.
    OfferId
}

branded_id! {
    /// Key of a broker subscription in the registry.
    SubscriptionKey
}

impl SubscriptionKey {
    /// Generate a fresh random key (UUID v7).
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("sub-{}", Uuid::now_v7()))
    }
}
