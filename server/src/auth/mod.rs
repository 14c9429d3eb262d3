pub mod authenticator;
pub mod handshake;
pub mod password;
pub mod token;

pub use authenticator::{AuthContext, Authenticator};
pub use password::{hash_password, verify_password};
