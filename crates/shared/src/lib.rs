//! Process bootstrap shared by every binary in the workspace: env loading,
//! tracing setup, pool construction, migrations.

pub mod bootstrap;

pub use bootstrap::{init_db, init_env, init_tracing, run_migrations};
