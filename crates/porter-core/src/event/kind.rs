//! Event kinds this crate emits or consumes.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Kind(u16);

impl Kind {
    /// Profile metadata.
    pub const METADATA: Kind = Kind(0);
    /// Plain note; used for multi-media posts that mix images and video.
    pub const TEXT_NOTE: Kind = Kind(1);
    pub const PICTURE: Kind = Kind(20);
    pub const VIDEO: Kind = Kind(21);
    pub const SHORT_VIDEO: Kind = Kind(22);
    /// Remote-signer RPC envelope.
    pub const NOSTR_CONNECT: Kind = Kind(24133);
    /// Upload authorization for content-addressed blob stores.
    pub const BLOB_AUTH: Kind = Kind(24242);
    pub const LONG_FORM: Kind = Kind(30023);

    pub const fn new(kind: u16) -> Self {
        Self(kind)
    }

    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Parameterized replaceable range: identity is (kind, author, `d` tag).
    pub fn is_addressable(self) -> bool {
        (30000..40000).contains(&self.0)
    }
}

impl From<u16> for Kind {
    fn from(kind: u16) -> Self {
        Self(kind)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
