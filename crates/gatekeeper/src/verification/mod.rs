//! Per-user verification state.
//!
//! Flags are owned by the identity store and only raised through
//! [`VerificationStateMachine`]. There is no path back to unverified.

mod machine;
mod redis_store;
mod store;

pub use machine::{StateError, VerificationStateMachine};
pub use redis_store::RedisIdentityStore;
pub use store::{AccountError, IdentityStore, MemoryIdentityStore, generate_user_id};
