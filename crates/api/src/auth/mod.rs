//! Staff authentication.
//!
//! - [`jwt`] -- validation (and, for tooling and tests, issuance) of HS256
//!   access tokens issued by the staff identity provider.

pub mod jwt;
