pub mod jwt;
pub mod password;
pub mod sessions;

pub use jwt::{Claims, JwtCodec, TOKEN_TYPE_ACCESS, TOKEN_TYPE_REFRESH};
pub use sessions::{AccessClaims, SessionManager, TokenPair};
