use anyhow::Result;
use clap::parser::ValueSource;
use clap::{Arg, Command};
use serde_derive::Deserialize;

pub(crate) struct CliConfig {
    pub(crate) address: String,
    pub(crate) address_explicit: bool,
    pub(crate) config_file_path: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct Config {
    pub(crate) network: Network,
}

#[derive(Deserialize)]
pub(crate) struct Network {
    pub(crate) amqp_listen: String,
}

pub(crate) fn parse_config(path: &str) -> Result<Config> {
    let cfg = std::fs::read_to_string(path)?;

    Ok(toml::from_str(&cfg)?)
}

pub(crate) fn cli() -> CliConfig {
    let matches = Command::new("forgemq")
        .version("0.1.0")
        .about("AMQP 1.0 style message broker")
        .arg(
            Arg::new("address")
                .short('a')
                .long("address")
                .value_name("URL")
                .help("Listen on URL")
                .default_value("0.0.0.0"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Path to the config file"),
        )
        .get_matches();

    CliConfig {
        address: matches
            .get_one::<String>("address")
            .cloned()
            .unwrap_or_else(|| "0.0.0.0".to_string()),
        address_explicit: matches.value_source("address") == Some(ValueSource::CommandLine),
        config_file_path: matches.get_one::<String>("config").cloned(),
    }
}
