//! Board server command: `sprintboard serve`.

use anyhow::Result;

use sprintboard::board::server::{ServerConfig, start_server};
use sprintboard::board_config::BoardConfig;
use sprintboard::logging::init_tracing;

pub async fn cmd_serve(config: BoardConfig) -> Result<()> {
    let _guard = init_tracing(&config.logging)?;

    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    start_server(ServerConfig::from(&config)).await
}
