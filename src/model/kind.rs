//! Event kind and its persistence category
//!
//! Ranges follow NIP-01/NIP-09/NIP-33/NIP-40/NIP-42/NIP-62.

use serde::{Deserialize, Serialize};

/// Integer discriminator determining an event's semantics and persistence category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Kind(u16);

/// Well-known kind numbers referenced by built-in policies.
pub mod well_known {
    /// Profile metadata (replaceable)
    pub const METADATA: u16 = 0;
    /// Text note (regular)
    pub const TEXT_NOTE: u16 = 1;
    /// Follow list (replaceable)
    pub const CONTACT_LIST: u16 = 3;
    /// Deletion request
    pub const DELETION: u16 = 5;
    /// NIP-42 auth event
    pub const AUTHENTICATION: u16 = 22242;
    /// NIP-98 HTTP auth event, used by the management RPC endpoint
    pub const HTTP_AUTH: u16 = 27235;
    /// NIP-62 vanish request
    pub const VANISH: u16 = 62;
}

impl Kind {
    /// Build a [`Kind`] from its numeric value.
    #[inline]
    pub const fn new(kind: u16) -> Self {
        Self(kind)
    }

    /// Numeric value.
    #[inline]
    pub const fn as_u16(&self) -> u16 {
        self.0
    }

    /// Replaceable: kind 0, kind 3, or in 10000..20000. At most one event per (pubkey, kind).
    #[inline]
    pub fn is_replaceable(&self) -> bool {
        matches!(self.0, well_known::METADATA | well_known::CONTACT_LIST)
            || (10_000..20_000).contains(&self.0)
    }

    /// Parameterized-replaceable ("addressable"): 30000..40000. At most one per
    /// (pubkey, kind, `d`-tag value).
    #[inline]
    pub fn is_addressable(&self) -> bool {
        (30_000..40_000).contains(&self.0)
    }

    /// Ephemeral: 20000..30000. Broadcast but never persisted.
    #[inline]
    pub fn is_ephemeral(&self) -> bool {
        (20_000..30_000).contains(&self.0)
    }

    /// Regular: outside every other category. Persisted as-is.
    #[inline]
    pub fn is_regular(&self) -> bool {
        !self.is_replaceable() && !self.is_addressable() && !self.is_ephemeral()
    }

    #[inline]
    pub fn is_deletion(&self) -> bool {
        self.0 == well_known::DELETION
    }

    #[inline]
    pub fn is_vanish(&self) -> bool {
        self.0 == well_known::VANISH
    }

    #[inline]
    pub fn is_authentication(&self) -> bool {
        self.0 == well_known::AUTHENTICATION
    }
}

impl From<u16> for Kind {
    fn from(value: u16) -> Self {
        Self::new(value)
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
