mod client;
mod config;
mod container;
mod error;
mod queue;
mod url;
mod workqueue;

#[cfg(test)]
pub mod tests;

use clap::builder::styling::{AnsiColor, RgbColor};
use env_logger::Builder;
use log::error;
use std::io::Write;

use crate::container::Container;
use crate::url::Url;

#[macro_export]
macro_rules! logerr {
    ($val:expr) => {
        if let Err(e) = $val {
            log::error!("Error {:?}", e);
        }
    };
}

fn setup_logger() {
    let mut builder = Builder::from_default_env();

    builder
        .format_timestamp_millis()
        .format(|buf, record| {
            let lvl = buf.default_level_style(record.level());
            let lvl = match record.level() {
                log::Level::Error => lvl.fg_color(Some(AnsiColor::Red.into())),
                log::Level::Warn => lvl.fg_color(Some(AnsiColor::Yellow.into())),
                log::Level::Info => lvl.fg_color(Some(AnsiColor::Green.into())),
                log::Level::Debug => lvl.fg_color(Some(RgbColor(192, 192, 192).into())),
                log::Level::Trace => lvl.fg_color(Some(RgbColor(96, 96, 96).into())),
            };

            writeln!(
                buf,
                "{} - [{lvl}{:5}{lvl:#}] {}:{} - {}",
                buf.timestamp_millis(),
                record.level(),
                record.file().unwrap_or_default(),
                record.line().unwrap_or_default(),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Always)
        .init();
}

#[tokio::main]
pub async fn main() {
    setup_logger();

    let cli = config::cli();

    let mut listen = cli.address;
    if !cli.address_explicit {
        if let Some(path) = &cli.config_file_path {
            match config::parse_config(path) {
                Ok(cfg) => listen = cfg.network.amqp_listen,
                Err(e) => {
                    error!("broker shutdown: {e}");
                    std::process::exit(1);
                }
            }
        }
    }

    let url = Url::parse(&listen);
    let container = Container::new("forgemq");

    if let Err(e) = container.run(&url).await {
        error!("broker shutdown: {e}");
        std::process::exit(1);
    }
}
