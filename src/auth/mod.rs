#![forbid(unsafe_code)]

pub mod types;
pub mod jwt;

pub use jwt::TokenIssuer;
pub use types::Claims;
