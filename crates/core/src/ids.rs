use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Ids are opaque strings on the wire; new ones are generated client-side
/// (UUID v7 text) so optimistic display never waits on a server-assigned id.
macro_rules! string_id {
    ($name:ident) => {
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::now_v7().to_string())
            }

            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                // Ids are opaque wire strings, so 8 bytes may land inside
                // a multi-byte character; fall back to the whole id then.
                let short = self.0.get(..8).unwrap_or(&self.0);
                write!(f, "{}({})", stringify!($name), short)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(ProjectId);
string_id!(TaskId);
string_id!(SubtaskId);
string_id!(TodoId);
string_id!(TagId);
