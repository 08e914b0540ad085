//! Database connection pool and query helpers.
//!
//! This module provides:
//! - A bounded PostgreSQL connection pool with scoped checkouts
//! - Typed positional parameters
//! - Typed filter expressions for parameterized reads

pub mod filter;
pub mod params;
mod pool;

pub use filter::{Filter, Ident, Op};
pub use params::{SqlType, SqlValue};
pub use pool::{ConnectionPool, PoolStatus, PooledConnection, QueryOutput};
