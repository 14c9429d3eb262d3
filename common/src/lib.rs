//! Shared digest, node codec, realm validation and wire error taxonomy for the tangled
//! CAS engine. Kept separate from `server`/`client` so both derive identical keys for
//! identical content without duplicating the hashing and encoding logic by hand.

pub mod digest;
pub mod error;
pub mod node;
pub mod realm;
