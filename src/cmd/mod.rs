//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module      | Commands handled         |
//! |-------------|--------------------------|
//! | `serve`     | `Serve`                  |
//! | `reconcile` | `Run`, `Retry`, `Runs`   |
//! | `db`        | `InitDb`, `Seed`         |
//! | `config`    | `Config`                 |

pub mod config;
pub mod db;
pub mod reconcile;
pub mod serve;

pub use config::{cmd_config, cmd_config_init};
pub use db::{cmd_init_db, cmd_seed};
pub use reconcile::{cmd_retry, cmd_run, cmd_runs};
pub use serve::cmd_serve;
