//! Auth handlers and supporting modules.
//!
//! Accounts carry a bcrypt password hash, a role (`user` or `admin`) and a
//! `last_security_update` stamp. Access and refresh JWTs are signed with
//! separate secrets; single-use email tokens are stored hashed and consumed
//! atomically. All transactional email goes through the database outbox.

mod credentials;
pub(crate) mod guard;
pub(crate) mod login;
pub(crate) mod password;
pub(crate) mod refresh;
pub(crate) mod register;
mod state;
mod storage;
pub(crate) mod tokens;
pub(crate) mod types;
mod utils;
pub(crate) mod verification;

pub use state::AuthConfig;

pub(crate) use credentials::hash_password_blocking;
pub(crate) use utils::valid_password;
