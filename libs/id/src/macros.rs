//! Prefixed ULID identifiers for tasks and reloads.

use crate::{IdError, Ulid};

/// Parses `{prefix}_{ulid}`.
#[doc(hidden)]
pub fn parse_prefixed(prefix: &'static str, value: &str) -> Result<Ulid, IdError> {
    let malformed = |reason: String| IdError::Malformed {
        prefix,
        value: value.to_string(),
        reason,
    };

    let rest = value
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('_'))
        .ok_or_else(|| malformed(format!("expected a {prefix}_ prefix")))?;

    rest.parse::<Ulid>().map_err(|e| malformed(e.to_string()))
}

/// Defines a `Copy` ID that renders as `{prefix}_{ulid}`.
///
/// IDs sort by creation time, so log lines for consecutive reloads or task
/// spawns can be ordered by ID alone.
#[macro_export]
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name($crate::Ulid);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            #[must_use]
            pub fn new() -> Self {
                Self($crate::Ulid::new())
            }

            /// Milliseconds since the Unix epoch at which the ID was generated.
            #[must_use]
            pub fn timestamp_ms(&self) -> u64 {
                self.0.timestamp_ms()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $crate::parse_prefixed($prefix, s).map(Self)
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}
