//! Warehouse target: key-pair authentication, the SQL API client, DDL
//! generation, and the [`TargetWriter`](crate::core::TargetWriter) implementation.

mod auth;
mod client;
pub mod ddl;
mod snowflake;

pub use auth::{Claims, JwtAuthenticator};
pub use client::{Binding, Scope, SqlApiClient, StatementResult};
pub use snowflake::{bind_value, SnowflakeWriter};
