//! Command-line interface for padlink.
//!
//! Addresses go to stdout, one per line, so the output can be piped from
//! `esp32 read` into `ds4 write`. Logs and errors go to stderr.

use std::io::{self, BufRead};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use padlink::{
    config::{Backend, Config, RegisterFallback},
    ds4::Ds4Session,
    esp32::esptool::Esptool,
    source,
    tracing::{self, prelude::*},
    MacAddress,
};

/// Read and write the MAC addresses that pair a DualShock 4 with an ESP32
#[derive(Parser, Debug)]
#[command(name = "padlink")]
#[command(version, about, long_about = None)]
struct Args {
    /// Label output lines
    #[arg(short, long, global = true)]
    info: bool,

    /// Enable debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// How to talk to the ESP32 (native, esptool)
    #[arg(long, global = true)]
    backend: Option<Backend>,

    /// What a failed register read yields (error, zero)
    #[arg(long, global = true)]
    register_fallback: Option<RegisterFallback>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// DualShock 4 over USB
    #[command(subcommand)]
    Ds4(Ds4Command),

    /// ESP32 over serial
    #[command(subcommand)]
    Esp32(Esp32Command),

    /// Write the ESP32's MAC into the controller and verify it
    Pair {
        /// Serial port of the ESP32 (scans when omitted)
        #[arg(short, long, conflicts_with = "mac")]
        port: Option<String>,

        /// Use this address instead of reading an ESP32
        #[arg(short, long)]
        mac: Option<MacAddress>,
    },
}

#[derive(Subcommand, Debug)]
enum Ds4Command {
    /// Print the host address the controller is paired with
    Read,

    /// Set the host address (read from stdin when omitted)
    Write { mac: Option<MacAddress> },
}

#[derive(Subcommand, Debug)]
enum Esp32Command {
    /// Print the factory MAC (scans ports when none is given)
    Read { port: Option<String> },

    /// List candidate serial ports
    Ports,
}

fn main() {
    let args = Args::parse();
    tracing::init_stderr(args.verbose);

    if let Err(e) = run(args) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = Config::load().context("loading configuration")?;
    if let Some(backend) = args.backend {
        config.backend = backend;
    }
    if let Some(fallback) = args.register_fallback {
        config.register_fallback = fallback;
    }
    debug!(?config, "Configuration");

    let out = Output { info: args.info };

    match args.command {
        Command::Ds4(Ds4Command::Read) => {
            let mut session = Ds4Session::open()?;
            let mac = session.read_mac()?;
            out.mac("Controller host", mac);
        }
        Command::Ds4(Ds4Command::Write { mac }) => {
            let mac = match mac {
                Some(mac) => mac,
                None => mac_from_stdin()?,
            };
            let mut session = Ds4Session::open()?;
            session.write_mac(mac)?;
            out.mac("Controller host written", mac);
        }
        Command::Esp32(Esp32Command::Read { port }) => {
            let (port, mac) = esp32_mac(&config, port.as_deref())?;
            out.line(&format!("ESP32 on {port}"), &mac.to_string());
        }
        Command::Esp32(Esp32Command::Ports) => {
            for port in source::ports_to_scan(&config)? {
                println!("{port}");
            }
        }
        Command::Pair { port, mac } => {
            let mac = match mac {
                Some(mac) => mac,
                None => esp32_mac(&config, port.as_deref())?.1,
            };

            let mut session = Ds4Session::open()?;
            let pairing = session.pair(mac)?;
            if let Some(previous) = pairing.previous {
                out.mac("Previous host", previous);
            }
            out.mac("Controller host", pairing.readback);
            if !pairing.verified() {
                bail!(
                    "controller reports {} after writing {}",
                    pairing.readback,
                    pairing.written
                );
            }
        }
    }

    Ok(())
}

/// The ESP32 MAC from `port`, or from the first candidate port that answers.
fn esp32_mac(config: &Config, port: Option<&str>) -> Result<(String, MacAddress)> {
    if config.backend == Backend::Esptool && !Esptool::new(&config.esptool_python).check_installed()
    {
        bail!(
            "esptool not found; install it with `{} -m pip install esptool`",
            config.esptool_python
        );
    }

    let source = source::source_for(config);
    match port {
        Some(port) => {
            let mac = source
                .read_mac(port)
                .with_context(|| format!("reading ESP32 MAC on {port}"))?;
            Ok((port.to_string(), mac))
        }
        None => {
            let ports = source::ports_to_scan(config)?;
            info!(count = ports.len(), "Scanning serial ports");
            Ok(source::find_any_mac(&*source, &ports)?)
        }
    }
}

fn mac_from_stdin() -> Result<MacAddress> {
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("reading MAC from stdin")?;
    Ok(MacAddress::parse(line.trim())?)
}

struct Output {
    info: bool,
}

impl Output {
    fn line(&self, label: &str, value: &str) {
        if self.info {
            println!("{label}: {value}");
        } else {
            println!("{value}");
        }
    }

    fn mac(&self, label: &str, mac: MacAddress) {
        self.line(label, &mac.to_string());
    }
}
