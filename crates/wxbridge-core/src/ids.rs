//! Prefixed random identifiers for gateway requests and connections.

use std::fmt;

use uuid::Uuid;

macro_rules! prefixed_id {
    ($(#[$meta:meta])* $name:ident => $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Hash, Eq, PartialEq)]
        pub struct $name(String);

        impl $name {
            /// `<prefix>_<uuid v4>`, so 122 random bits per id.
            pub fn new() -> Self {
                Self(format!(concat!($prefix, "_{}"), Uuid::new_v4().simple()))
            }

            /// Wrap an id read off the wire.
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

prefixed_id! {
    /// Id of an outbound request awaiting its response.
    RequestId => "req"
}

prefixed_id! {
    /// Id of one gateway connection, for correlating log lines.
    ConnectionId => "conn"
}
