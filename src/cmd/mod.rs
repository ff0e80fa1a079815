//! CLI command implementations.
//!
//! | Module    | Commands handled                 |
//! |-----------|----------------------------------|
//! | `migrate` | `Migrate` (`create`/`list`/`run`) |
//! | `deploy`  | `Deploy`                         |
//! | `config`  | `Config`                         |

pub mod config;
pub mod deploy;
pub mod migrate;

pub use config::cmd_config;
pub use deploy::cmd_deploy;
pub use migrate::{cmd_migrate_create, cmd_migrate_list, cmd_migrate_run};
