use std::sync::Arc;

use anyhow::Result;
use envconfig::Envconfig;
use log::{LevelFilter, info, warn};
use mimalloc::MiMalloc;
use simple_logger::SimpleLogger;
use tokio::{
    io::{AsyncBufReadExt, BufReader, stdin},
    select, signal,
};

use cls_log_forwarder::{
    AppendFieldsStrategies, ClsEnvVars, ForwarderSlot, MirrorLogger, forwarder::LogForwarder,
};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    //Load env variables
    let vars = ClsEnvVars::init_from_env()?;
    let console = SimpleLogger::new().with_level(LevelFilter::Info);

    let slot = ForwarderSlot::new(match vars.forwarder_settings()? {
        Some(settings) => {
            let fields = AppendFieldsStrategies::host_metadata(env!("CARGO_PKG_VERSION"), "demo");
            let forwarder = Arc::new(LogForwarder::connect(settings, fields)?);
            MirrorLogger::new(Box::new(console), forwarder.clone()).install(LevelFilter::Info)?;
            Some(forwarder)
        }
        None => {
            console.init()?;
            warn!("Set CLS_ENDPOINT and CLS_TOPIC_ID to ship these lines");
            None
        }
    });

    select! {
        _ = signal::ctrl_c() => info!("Received CTRL-C signal"),
        _ = forward_stdin() => info!("Reached end of input"),
    }

    if let Some(forwarder) = slot.forwarder() {
        info!("{} entries still buffered, flushing", forwarder.buffered_len());
    }
    slot.close().await;

    Ok(())
}

async fn forward_stdin() {
    let mut lines = BufReader::new(stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if !line.trim().is_empty() {
            info!(target: "stdin", "{}", line);
        }
    }
}
