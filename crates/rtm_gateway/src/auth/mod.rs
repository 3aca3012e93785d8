//! Identity tokens: verification and the claims they carry.

pub mod claims;
pub mod validator;

pub use claims::{Claims, Expiry, IdentityKey};
pub use validator::TokenValidator;
