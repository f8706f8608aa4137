//! Authentication and authorization for CivicConnect
//!
//! Provides:
//! - JWT access/refresh token generation and validation
//! - Request authentication and the admin role gate
//! - Password hashing with Argon2
//! - Field-level encryption for identity documents

pub mod guard;
pub mod jwt;
pub mod password;
pub mod secrets;

pub use guard::{authenticate, authenticate_optional, require_admin, AuthUser};
pub use jwt::{Claims, TokenSigner};
pub use password::{hash_password, verify_password};
pub use secrets::FieldCipher;
