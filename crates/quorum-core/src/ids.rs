//! Identifier newtypes
//!
//! Peers, groups and group members are addressed by opaque strings issued by
//! the surrounding platform. Distinct types keep them from being mixed up.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create an identifier.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Remote party of a pairwise session
    PeerId
);

string_id!(
    /// Group channel (e.g. a vote-result broadcast channel)
    GroupId
);

string_id!(
    /// Member of a group channel
    MemberId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_display_as_plain_strings() {
        assert_eq!(PeerId::from("alice").to_string(), "alice");
        assert_eq!(GroupId::new("votes-2024").as_str(), "votes-2024");
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&MemberId::from("bob")).unwrap();
        assert_eq!(json, "\"bob\"");
    }
}
