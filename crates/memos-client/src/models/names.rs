//! Resource names (`memos/{id}`, `attachments/{id}`, `users/{id}`).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

macro_rules! resource_name {
    ($(#[$meta:meta])* $name:ident, $prefix:literal, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            /// Collection prefix including the trailing slash.
            pub const PREFIX: &'static str = $prefix;

            /// Parse a full resource name, or a bare id which gets prefixed.
            pub fn parse(raw: &str) -> Result<Self, ValidationError> {
                let raw = raw.trim();
                let id = raw.strip_prefix(Self::PREFIX).unwrap_or(raw);
                validate_id(id).map_err(|message| {
                    ValidationError::single(concat!($kind, " name"), "name", message)
                })?;
                Ok(Self(format!("{}{}", Self::PREFIX, id)))
            }

            /// Parse a name that must already carry the collection prefix.
            pub fn parse_strict(raw: &str) -> Result<Self, String> {
                let id = raw.strip_prefix(Self::PREFIX).ok_or_else(|| {
                    format!("must start with '{}'", Self::PREFIX)
                })?;
                validate_id(id)?;
                Ok(Self(raw.to_string()))
            }

            /// The id segment after the collection prefix.
            #[must_use]
            pub fn id(&self) -> &str {
                &self.0[Self::PREFIX.len()..]
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                Self::parse_strict(&raw).map_err(serde::de::Error::custom)
            }
        }
    };
}

resource_name!(
    /// Server-assigned memo identity, immutable after creation.
    MemoName,
    "memos/",
    "memo"
);
resource_name!(
    /// Server-assigned attachment identity.
    AttachmentName,
    "attachments/",
    "attachment"
);
resource_name!(
    /// User identity.
    UserName,
    "users/",
    "user"
);

fn validate_id(id: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err("id must not be empty".to_string());
    }
    if id.contains('/') || id.chars().any(char::is_whitespace) {
        return Err(format!("id '{id}' must not contain '/' or whitespace"));
    }
    Ok(())
}
