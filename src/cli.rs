use anyhow::{bail, Context, Result};
use std::path::PathBuf;

use crate::config::DEFAULT_CONFIG_FILE;

pub const USAGE: &str = "\
Usage: rpicoap [OPTIONS]

Reads humidity/temperature from a DHT22 and sends it to a CoAP telemetry endpoint.

Options:
  -c, --config <PATH>  Config file to use (default: config.ini)
  -e, --edit           Open the config file in an editor and exit
  -v, --verbose        Log every transmitted reading
  -f, --file <PATH>    Replay humidity,temperature rows from a file instead of the sensor
  -s, --simulate       Send constant test data instead of reading the sensor
  -h, --help           Show this help";

#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    pub config_path: PathBuf,
    pub edit: bool,
    pub verbose: bool,
    pub replay: Option<PathBuf>,
    pub simulate: bool,
    pub help: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_FILE),
            edit: false,
            verbose: false,
            replay: None,
            simulate: false,
            help: false,
        }
    }
}

impl Options {
    /// Parses arguments, without the program name.
    pub fn parse<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut options = Options::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    let path = args.next().context("--config needs a path")?;
                    options.config_path = PathBuf::from(path);
                }
                "-e" | "--edit" => options.edit = true,
                "-v" | "--verbose" => options.verbose = true,
                "-f" | "--file" => {
                    let path = args.next().context("--file needs a path")?;
                    options.replay = Some(PathBuf::from(path));
                }
                "-s" | "--simulate" => options.simulate = true,
                "-h" | "--help" => options.help = true,
                other => bail!("Unknown argument: {}\n\n{}", other, USAGE),
            }
        }

        if options.replay.is_some() && options.simulate {
            bail!("--file and --simulate cannot be combined");
        }
        Ok(options)
    }
}
