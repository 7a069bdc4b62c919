//! GPIO Debug Tool
//!
//! Inspect and drive Raspberry Pi GPIO pins through the register-level core.
//!
//! # Usage
//!
//! ```bash
//! # Show how the registers were mapped and which event backend is in use
//! gpio-debug info
//!
//! # Print the 40-pin header layout
//! gpio-debug pins
//!
//! # Read BCM 17, or header pin 11 (the same pin)
//! gpio-debug read 17
//! gpio-debug read --header 11
//!
//! # Drive a pin and watch another for edges
//! gpio-debug write 18 high
//! gpio-debug watch 17 --edge falling --mode input-pull-up
//!
//! # Blink an LED ten times, 250ms per phase
//! gpio-debug blink 18 --interval 250 --count 10
//! ```

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rpi_gpio::hal::{address, MemoryDevice, Register};
use rpi_gpio::{
    header_diagram, header_to_logical, logical_to_header, pin_name, timer, EdgeEvent, EdgeMask,
    Gpio, GpioConfig, PinMode, PIN_COUNT,
};

/// GPIO Debug Tool
///
/// Register-level GPIO inspection for Raspberry Pi
#[derive(Parser)]
#[command(name = "gpio-debug")]
#[command(author = "Prasanna Gautam")]
#[command(version = "0.1.0")]
#[command(about = "Register-level GPIO inspection and control for Raspberry Pi")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Interpret pin numbers as physical header positions
    #[arg(long, global = true)]
    header: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show register mapping, chip revision and event backend
    Info {
        /// Dump the readable GPIO registers
        #[arg(short, long)]
        registers: bool,
    },

    /// Show the header layout and pin numbering
    Pins,

    /// Read a pin level without reconfiguring it
    Read {
        /// Pin number (BCM, or header with --header)
        pin: u8,
    },

    /// Configure a pin as output and drive it
    Write {
        /// Pin number (BCM, or header with --header)
        pin: u8,

        /// Level to drive
        level: Level,
    },

    /// Show or set a pin mode
    Mode {
        /// Pin number (BCM, or header with --header)
        pin: u8,

        /// New mode: input, output, input-pull-up, input-pull-down
        mode: Option<PinMode>,
    },

    /// Print edge events until Ctrl+C or timeout
    Watch {
        /// Pin number (BCM, or header with --header)
        pin: u8,

        /// Edges to report
        #[arg(short, long, value_enum, default_value = "both")]
        edge: EdgeArg,

        /// Input mode to configure before watching
        #[arg(short, long, default_value = "input")]
        mode: PinMode,

        /// Stop after this many milliseconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Toggle a pin at a fixed interval
    Blink {
        /// Pin number (BCM, or header with --header)
        pin: u8,

        /// Milliseconds per phase
        #[arg(short, long, default_value = "500")]
        interval: f64,

        /// Number of toggles
        #[arg(short = 'n', long, default_value = "10")]
        count: u64,
    },

    /// Show timer calibration and measured wait accuracy
    Timer {
        /// Samples per target duration
        #[arg(short, long, default_value = "20")]
        samples: u32,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Level {
    High,
    Low,
}

#[derive(Clone, Copy, ValueEnum)]
enum EdgeArg {
    Rising,
    Falling,
    Both,
}

impl From<EdgeArg> for EdgeMask {
    fn from(edge: EdgeArg) -> Self {
        match edge {
            EdgeArg::Rising => EdgeMask::RISING,
            EdgeArg::Falling => EdgeMask::FALLING,
            EdgeArg::Both => EdgeMask::BOTH,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let config = match &cli.config {
        Some(path) => GpioConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => GpioConfig::default(),
    };

    match cli.command {
        Commands::Info { registers } => handle_info(config, registers),
        Commands::Pins => {
            handle_pins();
            Ok(())
        }
        Commands::Read { pin } => handle_read(config, resolve_pin(pin, cli.header)?),
        Commands::Write { pin, level } => {
            handle_write(config, resolve_pin(pin, cli.header)?, level)
        }
        Commands::Mode { pin, mode } => handle_mode(config, resolve_pin(pin, cli.header)?, mode),
        Commands::Watch {
            pin,
            edge,
            mode,
            timeout,
        } => handle_watch(config, resolve_pin(pin, cli.header)?, edge, mode, timeout),
        Commands::Blink {
            pin,
            interval,
            count,
        } => handle_blink(config, resolve_pin(pin, cli.header)?, interval, count),
        Commands::Timer { samples } => {
            handle_timer(samples);
            Ok(())
        }
    }
}

fn resolve_pin(pin: u8, header: bool) -> Result<u8> {
    if header {
        Ok(header_to_logical(pin)?)
    } else {
        Ok(pin)
    }
}

fn open_gpio(config: GpioConfig) -> Result<Gpio> {
    let gpio = Gpio::with_config(config).context("Failed to map GPIO registers")?;
    Ok(gpio)
}

fn describe_pin(pin: u8) -> String {
    let name = pin_name(pin).map(str::to_string).unwrap_or_else(|| format!("BCM {}", pin));
    match logical_to_header(pin) {
        Some(header) => format!("{} (header {})", name, header),
        None => name,
    }
}

fn describe_function(fsel: u32) -> &'static str {
    match fsel {
        0b000 => "input",
        0b001 => "output",
        0b100 => "alt0",
        0b101 => "alt1",
        0b110 => "alt2",
        0b111 => "alt3",
        0b011 => "alt4",
        _ => "alt5",
    }
}

fn handle_info(config: GpioConfig, registers: bool) -> Result<()> {
    let gpio = open_gpio(config.clone())?;

    println!("{}", "=".repeat(60));
    println!("{}", "GPIO Core".cyan().bold());
    println!("{}", "=".repeat(60));

    if let Some(device) = gpio.memory_device() {
        let path = match device {
            MemoryDevice::GpioMem => &config.gpiomem_path,
            MemoryDevice::Mem => &config.mem_path,
        };
        println!("  Register device: {}", path.display().to_string().white());
    }

    let address = match gpio.peripheral_address() {
        Some(address) => Some(address),
        None => address::resolve(&config).ok(),
    };
    match address {
        Some(address) => {
            println!("  Peripheral base: {}", address.to_string().white());
            println!("  GPIO block:      {:#010x}", address.gpio_address());
        }
        None => println!("  Peripheral base: {}", "unknown".yellow()),
    }
    println!("  Pull protocol:   {}", gpio.revision());

    match gpio.interrupt_source() {
        Ok(source) => println!("  Event backend:   {}", source.backend().green()),
        Err(e) => println!("  Event backend:   {} ({})", "unavailable".red(), e),
    }

    if registers {
        println!("\n{}", "Registers:".white().bold());
        for reg in Register::readable() {
            println!(
                "  {:<26} {:#010x}",
                reg.to_string(),
                gpio.registers().read(reg)
            );
        }
    }

    println!("{}", "=".repeat(60));
    Ok(())
}

fn handle_pins() {
    println!("{}", header_diagram());
    println!();
    println!(
        "  {:<8} {:<6} {}",
        "Header".white().bold(),
        "BCM".white().bold(),
        "Name".white().bold()
    );
    for pin in 0..PIN_COUNT as u8 {
        if let Some(header) = logical_to_header(pin) {
            println!(
                "  {:<8} {:<6} {}",
                header,
                pin,
                pin_name(pin).unwrap_or("(reserved)").dimmed()
            );
        }
    }
}

fn handle_read(config: GpioConfig, pin: u8) -> Result<()> {
    let gpio = open_gpio(config)?;
    let fsel = gpio.function(pin)?;
    let high = gpio.read_all() & (1 << pin) != 0;

    println!(
        "{} {} is {} ({})",
        "[*]".cyan().bold(),
        describe_pin(pin).white(),
        if high { "HIGH".green().bold() } else { "LOW".red().bold() },
        describe_function(fsel)
    );
    Ok(())
}

fn handle_write(config: GpioConfig, pin: u8, level: Level) -> Result<()> {
    let gpio = open_gpio(config)?;
    gpio.open_pin(pin)?;
    gpio.set_mode(pin, PinMode::Output)?;
    let high = matches!(level, Level::High);
    gpio.write(pin, high)?;

    println!(
        "{} {} driven {}",
        "[OK]".green().bold(),
        describe_pin(pin).white(),
        if high { "HIGH" } else { "LOW" }
    );
    Ok(())
}

fn handle_mode(config: GpioConfig, pin: u8, mode: Option<PinMode>) -> Result<()> {
    let gpio = open_gpio(config)?;
    match mode {
        Some(mode) => {
            gpio.open_pin(pin)?;
            gpio.set_mode(pin, mode)?;
            println!(
                "{} {} set to {}",
                "[OK]".green().bold(),
                describe_pin(pin).white(),
                mode.to_string().cyan()
            );
        }
        None => {
            let fsel = gpio.function(pin)?;
            println!(
                "{} {} function: {}",
                "[*]".cyan().bold(),
                describe_pin(pin).white(),
                describe_function(fsel).cyan()
            );
        }
    }
    Ok(())
}

fn handle_watch(
    config: GpioConfig,
    pin: u8,
    edge: EdgeArg,
    mode: PinMode,
    timeout: Option<u64>,
) -> Result<()> {
    let gpio = open_gpio(config)?;
    let handle = gpio.pin(pin)?;
    handle.set_mode(mode)?;

    let mask = EdgeMask::from(edge);
    let count = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&count);
    handle.on_edge(mask, move |event: &EdgeEvent| {
        counter.fetch_add(1, Ordering::SeqCst);
        let timestamp = Local::now().format("%H:%M:%S%.3f");
        let edge = match event.edge {
            rpi_gpio::Edge::Rising => "RISING ".green(),
            rpi_gpio::Edge::Falling => "FALLING".red(),
        };
        let bounce = if event.bounced { " (bounce)".dimmed() } else { "".normal() };
        println!(
            "{} {} {} @ {:.3}ms{}",
            format!("[{}]", timestamp).dimmed(),
            edge,
            describe_pin(event.pin),
            event.timestamp_ms,
            bounce
        );
    })?;

    println!(
        "{} Watching {} for {} edges (mode {}). Press Ctrl+C to stop.",
        "[*]".cyan().bold(),
        describe_pin(pin).white(),
        mask,
        mode
    );

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(async {
        let limit = tokio::time::sleep(Duration::from_millis(timeout.unwrap_or(u64::MAX / 4)));
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl+C")?;
                println!("\n{}", "Stopping watch...".yellow());
            }
            _ = limit => {}
        }
        Ok::<(), anyhow::Error>(())
    })?;

    println!(
        "{} {} edge(s) seen",
        "[OK]".green().bold(),
        count.load(Ordering::SeqCst)
    );
    handle.close()?;
    Ok(())
}

fn handle_blink(config: GpioConfig, pin: u8, interval: f64, count: u64) -> Result<()> {
    let gpio = open_gpio(config)?;
    let led = gpio.pin(pin)?;
    led.set_mode(PinMode::Output)?;

    println!(
        "{} Blinking {} every {}ms ({} toggles)",
        "[*]".cyan().bold(),
        describe_pin(pin).white(),
        interval,
        count
    );

    let toggles = toggle_every(interval, count, || led.toggle()).context("Blink stopped")?;

    led.close()?;
    println!("{} Done after {} toggles", "[OK]".green().bold(), toggles);
    Ok(())
}

/// Run `toggle` `count` times on the interval grid; zero runs it never
fn toggle_every<F, T>(interval: f64, count: u64, mut toggle: F) -> rpi_gpio::GpioResult<u64>
where
    F: FnMut() -> rpi_gpio::GpioResult<T>,
{
    if count == 0 {
        return Ok(0);
    }
    let mut toggles = 0u64;
    let mut failure = None;
    timer::every(interval, || {
        if let Err(e) = toggle() {
            failure = Some(e);
            return false;
        }
        toggles += 1;
        toggles < count
    });
    match failure {
        Some(e) => Err(e),
        None => Ok(toggles),
    }
}

fn handle_timer(samples: u32) {
    println!("{}", "=".repeat(60));
    println!("{}", "Precise Timer".cyan().bold());
    println!("{}", "=".repeat(60));
    println!("  Sleep resolution: {:?}", timer::resolution());

    println!(
        "\n  {:>10} {:>12} {:>12} {:>12}",
        "target".white().bold(),
        "min".white().bold(),
        "avg".white().bold(),
        "max".white().bold()
    );
    for target in [0.01, 0.1, 1.0, 10.0, 100.0] {
        let mut min = f64::MAX;
        let mut max = 0.0f64;
        let mut total = 0.0;
        for _ in 0..samples.max(1) {
            let watch = timer::Stopwatch::new();
            timer::wait(target);
            let elapsed = watch.elapsed_ms();
            min = min.min(elapsed);
            max = max.max(elapsed);
            total += elapsed;
        }
        let avg = total / f64::from(samples.max(1));
        let status = if min >= target { "[OK]".green() } else { "[UNDERSHOOT]".red() };
        println!(
            "  {:>8}ms {:>10.4}ms {:>10.4}ms {:>10.4}ms {}",
            target, min, avg, max, status
        );
    }
    println!("{}", "=".repeat(60));
}
