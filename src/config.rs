use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use serde::Deserialize;

use crate::error::{Error, Result};

pub const DEFAULT_BUFFER_LEN: usize = 8;

const EXAMPLES: &str = "\
Examples:
  netrelay google.com:80
    Open a tcp connection in text mode to google.com:80
  netrelay -u -l :12345 127.0.0.1:12345
    Open a udp connection in text mode at 0.0.0.0:12345, and then connect to it (let's chat with yourself)
  netrelay -u -b 8.8.8.8:53
    Open a udp connection to a DNS server with binary mode
  netrelay -x 127.0.0.1:1080 example.com:80
    Open a tcp connection to example.com:80 through a socks5 proxy";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Text,
    Binary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LineBreak {
    #[value(name = "cr")]
    Cr,
    #[default]
    #[value(name = "lf")]
    Lf,
    #[value(name = "crlf")]
    CrLf,
}

impl LineBreak {
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            LineBreak::Cr => b"\r",
            LineBreak::Lf => b"\n",
            LineBreak::CrLf => b"\r\n",
        }
    }
}

/// Command line of the `netrelay` binary.
#[derive(Parser, Debug, Default)]
#[command(name = "netrelay", version, about = "Relay stdin/stdout to a TCP or UDP peer", after_help = EXAMPLES)]
pub struct Options {
    /// Target address, host:port
    #[arg(required_unless_present = "license")]
    pub target: Option<String>,

    /// Use UDP mode instead of default TCP
    #[arg(short, long)]
    pub udp: bool,

    /// Use hex format input/output for binary data
    #[arg(short, long)]
    pub binary: bool,

    /// The maximum output bytes per line when under binary mode [default: 8]
    #[arg(short = 'B', long)]
    pub buffer: Option<usize>,

    /// The socks5 proxy address
    #[arg(short = 'x', long)]
    pub proxy: Option<String>,

    /// Local bind address (UDP only)
    #[arg(short, long)]
    pub listen: Option<String>,

    /// The line break appended to sent lines [default: lf]
    #[arg(long, value_enum)]
    pub linebreak: Option<LineBreak>,

    /// Read defaults from a TOML file; command line values win
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Print the license
    #[arg(long)]
    pub license: bool,

    /// Do not output the license (but you still have to follow it)
    #[arg(long)]
    pub no_license: bool,

    /// Log debug output
    #[arg(short, long)]
    pub verbose: bool,
}

/// Defaults read from `--config`; every key may be left out.
#[derive(Deserialize, Debug, Default)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub udp: Option<bool>,
    pub binary: Option<bool>,
    pub buffer: Option<usize>,
    pub proxy: Option<String>,
    pub listen: Option<String>,
    pub linebreak: Option<LineBreak>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        toml::from_str(&content).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }
}

/// Session settings. Built once before the relay starts and only read
/// afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub transport: Transport,
    pub mode: Mode,
    pub listen: Option<String>,
    pub target: String,
    pub proxy: Option<String>,
    pub buffer_len: usize,
    pub linebreak: LineBreak,
}

impl Config {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            transport: Transport::Tcp,
            mode: Mode::Text,
            listen: None,
            target: target.into(),
            proxy: None,
            buffer_len: DEFAULT_BUFFER_LEN,
            linebreak: LineBreak::default(),
        }
    }

    /// Loads the `--config` file, if any, and lays the command line over it.
    pub fn from_options(options: Options) -> Result<Self> {
        let file = match &options.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::merge(options, file)
    }

    pub fn merge(options: Options, file: FileConfig) -> Result<Self> {
        let target = options
            .target
            .ok_or_else(|| Error::Config("missing target address".to_string()))?;

        let udp = options.udp || file.udp.unwrap_or(false);
        let binary = options.binary || file.binary.unwrap_or(false);

        let buffer_len = options
            .buffer
            .or(file.buffer)
            .unwrap_or(DEFAULT_BUFFER_LEN);
        if buffer_len == 0 {
            return Err(Error::Config("buffer must be at least 1".to_string()));
        }

        let non_empty = |s: String| if s.is_empty() { None } else { Some(s) };

        Ok(Self {
            transport: if udp { Transport::Udp } else { Transport::Tcp },
            mode: if binary { Mode::Binary } else { Mode::Text },
            listen: options.listen.or(file.listen).and_then(non_empty),
            target,
            proxy: options.proxy.or(file.proxy).and_then(non_empty),
            buffer_len,
            linebreak: options.linebreak.or(file.linebreak).unwrap_or_default(),
        })
    }
}
