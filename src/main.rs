use env_logger::{Builder, WriteStyle};
use log::{error, LevelFilter};
use rpicoap::cli::{Options, USAGE};
use rpicoap::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = Options::parse(std::env::args().skip(1))?;
    if options.help {
        println!("{}", USAGE);
        return Ok(());
    }

    // Only the log level is read here; the full file is validated by `run`
    let mut level = AppConfig::peek_log_level(&options.config_path);
    if options.verbose {
        level = level.max(LevelFilter::Info);
    }

    // Initialise logger with a configured log level
    Builder::new()
        .filter_level(level)
        .write_style(WriteStyle::Always)
        .format_timestamp_secs()
        .init();

    if options.edit {
        return rpicoap::edit_config(&options);
    }

    if let Err(e) = rpicoap::run(options).await {
        error!("Application error: {}", e);
        return Err(e);
    }
    Ok(())
}
