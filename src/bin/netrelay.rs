use std::process;

use clap::Parser;
use log::{error, LevelFilter};
use netrelay::config::{Config, Options};
use netrelay::{Dialer, DirectDialer, RelayEngine, Socks5Dialer};
use tokio::io::BufReader;
use tokio::runtime::Runtime;

fn license() -> String {
    format!(
        "netrelay {}  Copyright (C) 2023  {}\n\
         This program comes with ABSOLUTELY NO WARRANTY.\n\
         This is free software, and you are welcome to redistribute it under certain conditions.\n",
        env!("CARGO_PKG_VERSION"),
        env!("CARGO_PKG_AUTHORS"),
    )
}

fn main() {
    let options = Options::parse();
    if options.license {
        print!("{}", license());
        return;
    }

    let level = if options.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::builder()
        .format_timestamp(None)
        .filter_level(level)
        .parse_default_env()
        .init();

    if !options.no_license {
        eprint!("{}", license());
    }

    let config = match Config::from_options(options) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };

    let rt = match Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Err when starting runtime: {}", e);
            process::exit(1);
        }
    };

    let code = rt.block_on(async move {
        let dialer: Box<dyn Dialer> = match &config.proxy {
            Some(proxy) => Box::new(Socks5Dialer::new(proxy.as_str())),
            None => Box::new(DirectDialer),
        };

        let input = BufReader::new(tokio::io::stdin());
        let engine = RelayEngine::new(config, input, tokio::io::stdout());
        match engine.run(dialer.as_ref()).await {
            Ok(()) => 0,
            Err(e) => {
                error!("{}", e);
                1
            }
        }
    });

    // A pending stdin read would block a graceful runtime shutdown.
    rt.shutdown_background();
    process::exit(code);
}
