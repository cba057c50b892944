//! Signed capability links.
//!
//! [`SecureUrl`] seals small JSON claims into an encrypted payload plus an
//! HMAC signature. [`ShareService`] builds time-limited object shares on it,
//! and [`CapabilityLinks`] builds per-user verification and reset links.

pub mod error;
pub mod keys;
pub mod links;
pub mod secure_url;
pub mod share;

pub use error::{Result, ShareError, INVALID_REQUEST};
pub use keys::KeyStore;
pub use links::{CapabilityLinks, LinkPurpose, UserLink};
pub use secure_url::{Sealed, SecureUrl};
pub use share::{ShareConfig, ShareLink, ShareService};
