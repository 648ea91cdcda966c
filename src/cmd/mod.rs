//! CLI command implementations.
//!
//! | Module   | Commands handled |
//! |----------|------------------|
//! | `serve`  | `Serve`          |
//! | `init`   | `Init`           |
//! | `config` | `Config`         |

pub mod config;
pub mod init;
pub mod serve;

pub use config::{cmd_config, cmd_config_init};
pub use init::cmd_init;
pub use serve::cmd_serve;
