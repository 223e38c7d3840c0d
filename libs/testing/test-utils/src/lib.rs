//! Shared test infrastructure
//!
//! Container-backed fixtures for integration tests:
//! - `TestDatabase`: PostgreSQL with migrations applied (feature: "postgres")
//! - `TestRedis`: Redis with a ready `ConnectionManager` (feature: "redis")
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { workspace = true, features = ["redis"] }
//! ```
//!
//! ```rust,ignore
//! use test_utils::TestRedis;
//!
//! #[tokio::test]
//! async fn my_redis_test() {
//!     let redis = TestRedis::new().await;
//!     let manager = redis.manager();
//!     // pass the manager to the component under test
//! }
//! ```

#[cfg(feature = "postgres")]
mod postgres;

#[cfg(feature = "redis")]
mod redis;

#[cfg(feature = "postgres")]
pub use postgres::TestDatabase;

#[cfg(feature = "redis")]
pub use redis::TestRedis;
