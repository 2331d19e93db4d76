mod background;
mod bootstrap;
mod common;
mod config;
mod handler;
mod media;
mod webapi;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{info, warn};

use background::dispatcher::Dispatcher;
use background::flows::Pipeline;
use bootstrap::setup::{check_external_tools, initialize_folders, initialize_logger};
use config::{AppConfig, INPUT_DIR, JOBS_DIR, OUTPUT_DIR};
use handler::Handler;
use media::Converter;
use webapi::seventv::SevenTvApi;
use webapi::telegram::TelegramApi;

/// Backoff after a failed poll, so a flaky network does not spin the loop.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    initialize_logger(config.debug);
    check_external_tools();
    initialize_folders()?;

    let telegram = Arc::new(TelegramApi::new(&config.bot_api_key)?);
    let seventv = Arc::new(SevenTvApi::new(INPUT_DIR)?);
    let converter = Converter::new(
        JOBS_DIR,
        OUTPUT_DIR,
        config.encoder_threads,
        Duration::from_secs(config.external_timeout_secs),
    );

    let dispatcher = Dispatcher::spawn(Arc::new(Pipeline {
        telegram: Arc::clone(&telegram),
        seventv,
        converter,
    }));
    let handler = Arc::new(Handler {
        telegram: Arc::clone(&telegram),
        dispatcher,
    });

    info!("bot started, polling for updates");

    let mut offset: i64 = 0;
    loop {
        let updates = tokio::select! {
            result = telegram.get_updates(offset) => result,
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                return Ok(());
            }
        };

        let updates = match updates {
            Ok(updates) => updates,
            Err(err) => {
                warn!("polling failed: {:#}", err);
                tokio::time::sleep(POLL_RETRY_DELAY).await;
                continue;
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                handler.handle_update(update).await;
            });
        }
    }
}
