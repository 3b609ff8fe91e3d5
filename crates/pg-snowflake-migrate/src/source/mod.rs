//! PostgreSQL source database access.

mod postgres;
mod tls;

pub use postgres::{select_query, PgSourceReader};
pub use tls::{client_config, make_tls_connector, SslMode};
