//! # Drivegate Capability Library
//!
//! This crate provides the capability-token primitives for the Drivegate
//! access-control gateway.
//!
//! ## Overview
//!
//! The capability crate is the foundation of Drivegate's authorization layer,
//! providing:
//!
//! - **Claims Definitions**: Share and session claim structs with explicit,
//!   validated fields (never loosely-typed maps)
//! - **Token Codec**: HMAC-SHA256 signing and verification of claims, with a
//!   compact base64url wire form
//! - **Resource Identifiers**: Syntactic validation of remote-store resource
//!   ids before they reach any network call
//!
//! ## Token wire format
//!
//! ```text
//! base64url(json claims) "." base64url(hmac-sha256 tag)
//! ```
//!
//! Tokens are opaque to their holders: the gateway is the only party holding
//! the signing secret, so a token is a bearer capability that cannot be
//! forged or altered, only presented or withheld. Revocation is layered on
//! top by the gateway (this crate knows nothing about the revocation set).
//!
//! ## Example Usage
//!
//! ```rust
//! use capability::{Claims, ResourceId, ShareClaims, TokenCodec};
//!
//! let codec = TokenCodec::new(b"0123456789abcdef0123456789abcdef").unwrap();
//!
//! let resource = ResourceId::parse("1a2B3c4D5e6F").unwrap();
//! let claims = Claims::Share(ShareClaims::new(resource, 1_700_000_000, 3600, false));
//!
//! let token = codec.sign(&claims).unwrap();
//! let verified = codec.verify(&token, 1_700_000_100).unwrap();
//! assert_eq!(verified, claims);
//! ```
//!
//! ## Modules
//!
//! - [`claims`]: Share and session claim definitions
//! - [`codec`]: HMAC-SHA256 token signing and verification
//! - [`resource`]: Resource-id validation
//! - [`error`]: Error types

pub mod claims;
pub mod codec;
pub mod error;
pub mod resource;

pub use claims::{Claims, SessionClaims, ShareClaims};
pub use codec::{TokenCodec, MIN_SECRET_LEN};
pub use error::{CapabilityError, Result};
pub use resource::{ResourceId, MAX_RESOURCE_ID_LEN};
