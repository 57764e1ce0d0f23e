mod attenuator;
mod config;
mod error;
mod menu;
mod protocol;
mod scpi;
mod setupapi;
mod usb;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

use attenuator::Attenuator;
use config::AttenuatorConfig;
use error::AttenuatorError;
use menu::Menu;
use scpi::SetAttStatus;
use usb::UsbTransport;

#[derive(Parser, Debug)]
#[command(name = "attenuator")]
#[command(version)]
#[command(about = "Control a Mini-Circuits USB programmable attenuator", long_about = None)]
struct Cli {
    #[command(flatten)]
    search_options: SearchOptions,

    /// JSON configuration file; command-line options take precedence
    #[arg(long = "config", global = true)]
    config: Option<PathBuf>,

    /// Timeout for each USB transfer in milliseconds
    #[arg(long = "timeout-ms", global = true)]
    timeout_ms: Option<u64>,

    /// Number of attenuator channels
    #[arg(long = "channels", global = true)]
    channels: Option<u8>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Args, Debug)]
struct SearchOptions {
    /// Vendor ID (hex format, e.g., 0x20CE)
    #[arg(short = 'v', long = "vendor", global = true, value_parser = parse_hex_u16)]
    vendor_id: Option<u16>,

    /// Product ID (hex format, e.g., 0x0023)
    #[arg(short = 'p', long = "product", global = true, value_parser = parse_hex_u16)]
    product_id: Option<u16>,

    /// Serial number of the attenuator to open
    #[arg(short = 's', long = "serial", global = true)]
    serial: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List all USB devices, marking attenuators
    List,
    /// Print model name and serial number
    Info,
    /// Set the attenuation of one channel
    Set {
        #[arg(short = 'c', long = "channel")]
        channel: u8,
        /// Attenuation in dB
        #[arg(long = "value", allow_negative_numbers = true)]
        value: f64,
    },
    /// Query one channel, or all channels when none is given
    Get {
        #[arg(short = 'c', long = "channel")]
        channel: Option<u8>,
    },
    /// Send a raw SCPI command and print the reply
    Send { command: String },
    /// Interactive menu (default)
    Menu,
}

fn parse_hex_u16(s: &str) -> Result<u16, std::num::ParseIntError> {
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u16::from_str_radix(s, 16)
}

fn build_config(cli: &Cli) -> error::Result<AttenuatorConfig> {
    let mut config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => AttenuatorConfig::default(),
    };
    if let Some(vendor_id) = cli.search_options.vendor_id {
        config.vendor_id = vendor_id;
    }
    if let Some(product_id) = cli.search_options.product_id {
        config.product_id = product_id;
    }
    if let Some(serial) = &cli.search_options.serial {
        config.serial = Some(serial.clone());
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.timeout_ms = timeout_ms;
    }
    if let Some(channels) = cli.channels {
        config.channels = channels;
    }
    config.validate()?;
    Ok(config)
}

fn connect(config: &AttenuatorConfig) -> error::Result<Attenuator<UsbTransport>> {
    Attenuator::open(config).map_err(|e| AttenuatorError::Initialize(Box::new(e)))
}

fn failure_message(e: &(dyn std::error::Error + 'static)) -> String {
    match e.downcast_ref::<AttenuatorError>() {
        Some(init @ AttenuatorError::Initialize(_)) => init.to_string(),
        _ => format!("Error: {}", e),
    }
}

fn list_devices(config: &AttenuatorConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("\nListing all USB devices:");
    for device in usb::list_usb_devices()? {
        let marker = if device.matches(config.vendor_id, config.product_id) {
            "*"
        } else {
            " "
        };
        println!("{} {}", marker, device);
    }

    #[cfg(target_os = "windows")]
    {
        println!("\nSetupAPI USB devices:");
        for dev in setupapi::list_usb_instances() {
            let marker = if dev.vid == config.vendor_id && dev.pid == config.product_id {
                "*"
            } else {
                " "
            };
            println!("{} VID: {:04X}, PID: {:04X}, {}", marker, dev.vid, dev.pid, dev.instance_id);
        }
    }

    Ok(())
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = build_config(&cli)?;
    log::debug!("Using {:?}", config);

    match cli.command.unwrap_or(Command::Menu) {
        Command::List => list_devices(&config)?,
        Command::Info => {
            let attenuator = connect(&config)?;
            println!("Device Model: {}", attenuator.model_name());
            println!("Serial Number: {}", attenuator.serial_number());
        }
        Command::Set { channel, value } => {
            let mut attenuator = connect(&config)?;
            let channel = attenuator.channel(channel)?;
            let status = attenuator.set_attenuation(channel, value)?;
            println!(
                "Channel {} attenuation set to {} dB. Response: {}",
                channel,
                value,
                status.raw()
            );
            match status {
                SetAttStatus::Success => {}
                SetAttStatus::OutOfRange => log::warn!("Channel {}: {}", channel, status),
                _ => return Err(format!("channel {}: {}", channel, status).into()),
            }
        }
        Command::Get { channel: Some(channel) } => {
            let mut attenuator = connect(&config)?;
            let channel = attenuator.channel(channel)?;
            let reply = attenuator.query_attenuation(channel)?;
            println!("Channel {} attenuation: {} dB.", channel, reply);
            if scpi::parse_level(&reply).is_none() {
                log::warn!("Reply for channel {} is not a number: {:?}", channel, reply);
            }
        }
        Command::Get { channel: None } => {
            let mut attenuator = connect(&config)?;
            let reply = attenuator.query_all()?;
            println!("All channel attenuations: {}", reply);
            let levels = scpi::parse_levels(&reply);
            for (index, level) in levels.iter().enumerate() {
                log::debug!("Channel {}: {} dB", index + 1, level);
            }
        }
        Command::Send { command } => {
            let mut attenuator = connect(&config)?;
            println!("{}", attenuator.send_scpi(&command)?);
        }
        Command::Menu => {
            let mut attenuator = connect(&config)?;
            println!("Device connected successfully!");
            println!("Device Model: {}", attenuator.model_name());
            println!("Serial Number: {}", attenuator.serial_number());

            let stdin = io::stdin();
            Menu::new(&mut attenuator, stdin.lock(), io::stdout()).run()?;
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    if let Err(e) = run(Cli::parse()) {
        eprintln!("{}", failure_message(&*e));
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
