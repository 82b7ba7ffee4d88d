use std::io::{self, BufRead, Write};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing::{info, warn};

use cms_control_point::logging::{self, LoggingMode};
use cms_control_point::{ControlPoint, ControlPointConfig, UpnpTransport, UpnpTransportConfig};

mod command;
mod output;

use command::{Command, HelpText};

/// UPnP ConfigurationManagement control point
///
/// Discovers manageable devices, subscribes to their ConfigurationManagement
/// service and reads commands from stdin.
#[derive(Parser, Debug)]
#[command(name = "cms-cp")]
#[command(about = "Interactive UPnP ConfigurationManagement control point")]
#[command(version)]
pub struct Args {
    /// Device type to search for (matched as a case-insensitive prefix)
    #[arg(long, default_value = "urn:schemas-upnp-org:device:ManageableDevice:2")]
    pub device_type: String,

    /// Friendly name prefix a device must carry
    #[arg(long, default_value = "B2BUA", conflicts_with = "any_name")]
    pub friendly_name: String,

    /// Accept devices whatever their friendly name
    #[arg(long)]
    pub any_name: bool,

    /// Advertisement aging tick in seconds
    #[arg(long, default_value = "30")]
    pub tick: u64,

    /// Requested GENA subscription timeout in seconds
    #[arg(short = 's', long, default_value = "1801")]
    pub subscription_timeout: u64,

    /// MX value for searches, in seconds
    #[arg(long, default_value = "5")]
    pub search_mx: u32,

    /// Callback server port range start
    #[arg(long, default_value = "3400")]
    pub callback_port_start: u16,

    /// Callback server port range end
    #[arg(long, default_value = "3500")]
    pub callback_port_end: u16,

    /// Refuse actions on services without an active subscription
    #[arg(long)]
    pub require_subscription: bool,

    /// Log output: silent, development or debug (default: CMS_CP_LOG_MODE, else silent)
    #[arg(long)]
    pub log_mode: Option<String>,
}

impl Args {
    /// Control point configuration described by these arguments
    pub fn control_point_config(&self) -> Result<ControlPointConfig> {
        let friendly_name = (!self.any_name).then(|| self.friendly_name.clone());

        let config = ControlPointConfig::default()
            .with_device_type(self.device_type.clone())
            .with_friendly_name(friendly_name)
            .with_tick_interval(Duration::from_secs(self.tick))
            .with_subscription_timeout(Duration::from_secs(self.subscription_timeout))
            .with_search_mx(self.search_mx)
            .with_callback_ports(self.callback_port_start, self.callback_port_end)
            .with_require_subscription(self.require_subscription);

        config.validate().context("Invalid arguments")?;
        Ok(config)
    }

    fn init_logging(&self) -> Result<()> {
        match &self.log_mode {
            Some(name) => {
                let mode = LoggingMode::from_name(name)
                    .ok_or_else(|| anyhow!("Unknown log mode {name:?}; use silent, development or debug"))?;
                logging::init_logging(mode)?;
            }
            None => logging::init_logging_from_env()?,
        }
        Ok(())
    }
}

/// What the main loop reads: stdin lines and Ctrl-C
enum Input {
    Line(String),
    Interrupt,
    Closed,
}

/// Whether the main loop keeps going after a command
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

fn spawn_stdin_reader(inputs: mpsc::Sender<Input>) -> Result<()> {
    thread::Builder::new()
        .name("cms-cp-stdin".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if inputs.send(Input::Line(line)).is_err() {
                    return;
                }
            }
            let _ = inputs.send(Input::Closed);
        })
        .context("Failed to start stdin reader")?;
    Ok(())
}

fn execute(control_point: &ControlPoint, command: Command) -> Flow {
    let outcome = match command {
        Command::Help => {
            print!("{HelpText}");
            Ok(())
        }
        Command::Refresh => control_point.refresh(),
        Command::List(None) => {
            let devices = control_point.devices();
            println!("CMS control point device list ({}):", devices.len());
            for device in devices {
                println!("{device}");
            }
            Ok(())
        }
        Command::List(Some(device)) => control_point.describe(device).map(|report| print!("{report}")),
        Command::GetVar { device, variable } => control_point.query_variable(device, 0, &variable),
        Command::SetAlarmsEnabled { device, enabled } => control_point.set_alarms_enabled(device, enabled),
        Command::GetValues { device, path } => control_point.get_values(device, &path),
        Command::SetValues { device, path, value } => control_point.set_values(device, &path, &value),
        Command::Exit => return Flow::Exit,
    };

    if let Err(e) = outcome {
        println!("Error: {e}");
    }
    Flow::Continue
}

fn prompt() {
    print!(">> ");
    let _ = io::stdout().flush();
}

fn run(args: Args) -> Result<()> {
    let config = args.control_point_config()?;

    let (transport, events) = UpnpTransport::start(UpnpTransportConfig::for_control_point(&config))
        .context("Failed to start UPnP transport")?;
    info!(callback_url = transport.callback_url(), "Transport started");

    let (mut control_point, notifications) =
        ControlPoint::start(config, Arc::new(transport), events).context("Failed to start control point")?;

    let printer = thread::Builder::new()
        .name("cms-cp-notifications".to_string())
        .spawn(move || {
            for notification in notifications {
                println!("{}", output::render(&notification));
            }
        })
        .context("Failed to start notification printer")?;

    let (inputs_tx, inputs) = mpsc::channel();
    let interrupt = inputs_tx.clone();
    ctrlc::set_handler(move || {
        let _ = interrupt.send(Input::Interrupt);
    })
    .context("Failed to install Ctrl-C handler")?;
    spawn_stdin_reader(inputs_tx)?;

    println!("CMS control point started. Type Help for the list of commands.");
    prompt();
    for input in inputs.iter() {
        match input {
            Input::Line(line) => match command::parse(&line) {
                Some(Ok(command)) => {
                    if execute(&control_point, command) == Flow::Exit {
                        break;
                    }
                }
                Some(Err(e)) => println!("{e}"),
                None => {}
            },
            Input::Interrupt => {
                println!();
                info!("Interrupted");
                break;
            }
            Input::Closed => break,
        }
        prompt();
    }

    control_point.stop();
    // Dropping the control point closes the notification channel
    drop(control_point);
    if printer.join().is_err() {
        warn!("Notification printer panicked");
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    args.init_logging().context("Failed to initialize logging")?;
    run(args)
}
