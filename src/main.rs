use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use servo_telemetry::config::{ReadMode, TelemetryConfig};
use servo_telemetry::motor::{Field, MotorSpec};
use servo_telemetry::runtime;

/// Read servo telemetry from a Dynamixel bus and publish it over Zenoh
#[derive(Parser, Debug)]
#[command(name = "servo-telemetry", version)]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial port, overrides the config
    #[arg(short, long)]
    port: Option<String>,

    /// Field to read, e.g. present_pos or present_load
    #[arg(short, long)]
    field: Option<Field>,

    /// Acquisition mode
    #[arg(short, long, value_enum)]
    mode: Option<ReadMode>,

    /// Polling rate in Hz
    #[arg(long)]
    hz: Option<u64>,

    /// Motor as ID:MODEL, repeatable; replaces the config's motor list
    #[arg(long = "motor", value_parser = parse_motor)]
    motors: Vec<MotorSpec>,

    /// Take one sample, print it and exit
    #[arg(long)]
    once: bool,
}

fn parse_motor(s: &str) -> Result<MotorSpec, String> {
    let (id, model) = s
        .split_once(':')
        .ok_or_else(|| format!("expected ID:MODEL, got '{}'", s))?;
    Ok(MotorSpec {
        id: id.parse().map_err(|e| format!("bad motor id '{}': {}", id, e))?,
        model: model.parse().map_err(|e| format!("bad model '{}': {}", model, e))?,
    })
}

fn load_config(args: Args) -> Result<TelemetryConfig, Box<dyn std::error::Error + Send + Sync>> {
    let mut config = match &args.config {
        Some(path) => TelemetryConfig::load(path)?,
        None => TelemetryConfig::default(),
    };

    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(field) = args.field {
        config.field = field;
    }
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if let Some(hz) = args.hz {
        config.loop_hz = hz;
    }
    if !args.motors.is_empty() {
        config.motors = args.motors;
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let once = args.once;

    let config = match load_config(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(2);
        }
    };

    if once {
        match runtime::read_once(&config) {
            Ok(sample) => match serde_json::to_string_pretty(&sample) {
                Ok(json) => println!("{}", json),
                Err(e) => eprintln!("Cannot encode sample: {}", e),
            },
            Err(e) => {
                eprintln!("Read error: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    if let Err(e) = runtime::run(config).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
