mod terminal;

use anyhow::{Result, anyhow, bail};
use cdjf_core::benchmark::{self, BenchmarkConfig, Thresholds};
use cdjf_core::device::{ClusterSize, Device};
use cdjf_core::format::{FormatRequest, FormatSummary, Formatter, LARGE_DRIVE_GB};
use cdjf_core::frontend::FrontendSink;
use cdjf_core::platform::{self, DeviceDriver};
use cdjf_core::profile::{FormatSettings, ProfileStore, ProfileUpdate, SaveOutcome};
use cdjf_core::verify::{self, DEFAULT_TEST_SIZE_MB, VERIFY_FILE_NAME};
use chrono::Local;
use clap::{Parser, Subcommand};
use console::style;
use dialoguer::{MultiSelect, theme::ColorfulTheme};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use terminal::TerminalFrontend;

#[derive(Parser)]
#[command(name = "cdjf")]
#[command(about = "Prepare USB drives for rekordbox and CDJ/XDJ players", version)]
struct Cli {
    /// Print debug logging from the drive engine
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Profile store to use instead of the one in the configuration directory
    #[arg(long, env = "CDJF_PROFILE_PATH", global = true)]
    profile_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Erase one or more drives to FAT32
    Format {
        /// Devices to format; pick interactively when omitted
        devices: Vec<String>,

        /// Skip the benchmark and confirmation prompts
        #[arg(short, long)]
        yes: bool,

        /// Volume label for the drive [default: REKORDBOX]
        #[arg(short, long)]
        label: Option<String>,

        /// Saved profile to take the label, cluster size and thresholds from
        #[arg(long)]
        profile: Option<String>,

        /// Allocation unit size (512, 1K .. 64K)
        #[arg(long = "cluster-size")]
        cluster_size: Option<ClusterSize>,
    },
    /// Write a test pattern to mounted drives and read it back
    Verify {
        #[arg(required = true)]
        devices: Vec<String>,

        /// Amount of data to write, in MB
        #[arg(short, long, default_value_t = DEFAULT_TEST_SIZE_MB, allow_negative_numbers = true)]
        size: i64,

        /// Directory the verification reports are written to
        #[arg(long = "log-dir", default_value = ".")]
        log_dir: PathBuf,
    },
    /// Show details about a drive and measure its speed
    Info { device: String },
    /// Safely eject a drive
    Eject { device: String },
    /// List removable drives
    List,
    /// Manage saved format profiles
    #[command(subcommand)]
    Profile(ProfileCommand),
}

#[derive(Subcommand)]
enum ProfileCommand {
    /// Create or update a profile
    Save {
        name: String,

        #[arg(short, long)]
        label: Option<String>,

        #[arg(long = "cluster-size")]
        cluster_size: Option<ClusterSize>,

        /// Write speed (MB/s) below which a drive is extremely slow
        #[arg(long = "extremely-slow")]
        extremely_slow: Option<f64>,

        /// Write speed (MB/s) below which a drive is very slow
        #[arg(long = "very-slow")]
        very_slow: Option<f64>,

        /// Write speed (MB/s) below which a drive is slightly slow
        #[arg(long = "slightly-slow")]
        slightly_slow: Option<f64>,

        /// Write speed (MB/s) below which formatting asks for confirmation
        #[arg(long)]
        prompt: Option<f64>,

        /// Drop custom thresholds and go back to the defaults
        #[arg(
            long = "reset-benchmarks",
            conflicts_with_all = ["extremely_slow", "very_slow", "slightly_slow", "prompt"]
        )]
        reset_benchmarks: bool,
    },
    /// List saved profiles
    List,
    /// Show a profile's settings
    Show { name: String },
    /// Delete a profile
    Delete { name: String },
}

fn init_logging(verbose: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if verbose {
        builder.filter_module("cdjf_core", log::LevelFilter::Debug);
    }
    builder.init();
}

fn profile_store(path: Option<PathBuf>) -> Result<ProfileStore> {
    match path {
        Some(path) => Ok(ProfileStore::at(path)),
        None => Ok(ProfileStore::open_default()?),
    }
}

/// Presents an interactive multi-select of removable devices.
fn select_devices(driver: &dyn DeviceDriver) -> Result<Vec<String>> {
    let devices = driver.list_devices()?;
    if devices.is_empty() {
        return Err(anyhow!("No removable devices found."));
    }

    let items: Vec<String> = devices.iter().map(Device::to_string).collect();
    let selection = MultiSelect::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the drive(s) to format (space to toggle, enter to confirm)")
        .items(&items)
        .interact()?;
    if selection.is_empty() {
        bail!("No device selected.");
    }

    Ok(selection.into_iter().map(|i| devices[i].id.clone()).collect())
}

fn print_ready(summary: &FormatSummary) {
    let ready: Vec<&str> = summary.succeeded().map(|o| o.device.as_str()).collect();
    match ready.as_slice() {
        [] => {}
        [device] => {
            println!();
            println!("{}", style("✓ Format completed successfully!").green().bold());
            println!();
            println!("Your USB drive is now ready for rekordbox.");
            println!("You can now:");
            println!("  1. Connect the drive to your computer with rekordbox installed");
            println!("  2. Open rekordbox and add your music to the drive");
            println!("  3. Safely eject the drive and use it on CDJ/XDJ players");
            println!();
            println!("To check the drive end to end, run: cdjf verify {}", device);
        }
        devices => {
            println!();
            println!("All drives are now ready for rekordbox.");
            println!(
                "To check them end to end, run: cdjf verify {}",
                devices.join(" ")
            );
        }
    }
}

fn format_drives(
    driver: &dyn DeviceDriver,
    running: &AtomicBool,
    devices: Vec<String>,
    settings: FormatSettings,
    yes: bool,
) -> Result<ExitCode> {
    let devices = if devices.is_empty() {
        select_devices(driver)?
    } else {
        devices
    };

    let mut request = FormatRequest::new(devices);
    request.label = settings.label;
    request.cluster = settings.cluster;
    request.thresholds = settings.thresholds;
    request.assume_yes = yes;

    let frontend = TerminalFrontend::new();
    let summary = Formatter::new(driver, running).run(&request, &frontend)?;
    if summary.cancelled {
        return Ok(ExitCode::SUCCESS);
    }

    print_ready(&summary);
    Ok(if summary.all_succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Verifies one device. `Ok(false)` means the check ran and found a problem.
fn verify_device(
    driver: &dyn DeviceDriver,
    device: &str,
    size: u64,
    log_dir: &Path,
    running: &AtomicBool,
    frontend: &TerminalFrontend,
) -> Result<bool> {
    driver.validate_identifier(device)?;
    driver.ensure_removable(device)?;
    let mount_point = driver.mount_point(device)?;

    let mb = |bytes: u64| bytes as f64 / benchmark::MIB as f64;
    println!("[{}] Mount point: {}", device, mount_point.display());
    println!("[{}] Writing {:.1} MB test pattern...", device, mb(size));

    let mut sink = FrontendSink::new(frontend, device);
    let result = verify::verify(
        &mount_point.join(VERIFY_FILE_NAME),
        size,
        running,
        &mut sink,
    );

    println!("[{}] Write speed: {:.2} MB/s", device, result.throughput.write_mbps);
    println!("[{}] Read speed: {:.2} MB/s", device, result.throughput.read_mbps);
    if result.success() {
        println!(
            "[{}] {} ({:.1} MB verified).",
            device,
            style("Integrity check PASSED").green().bold(),
            mb(result.bytes_verified)
        );
    } else {
        println!(
            "[{}] {} after {:.1} MB.",
            device,
            style("Integrity check FAILED").red().bold(),
            mb(result.bytes_verified)
        );
        for error in &result.errors {
            println!("    {}", error);
        }
    }

    match verify::write_report(log_dir, device, &mount_point, size, &result, Local::now()) {
        Ok(path) => println!("[{}] Detailed log saved to {}", device, path.display()),
        Err(e) => eprintln!(
            "[{}] {} unable to write verification log: {}",
            device,
            style("Warning:").yellow().bold(),
            e
        ),
    }

    Ok(result.success())
}

fn verify_drives(
    driver: &dyn DeviceDriver,
    running: &AtomicBool,
    devices: &[String],
    size_mb: i64,
    log_dir: &Path,
) -> Result<ExitCode> {
    let size = verify::verification_size(size_mb)?;
    println!(
        "Starting integrity verification. This may take a few minutes per drive depending on speed."
    );

    let frontend = TerminalFrontend::new();
    let mut failed = false;
    for device in devices {
        if !running.load(Ordering::SeqCst) {
            println!("Verification cancelled.");
            failed = true;
            break;
        }
        println!();
        println!("[{}] Preparing verification...", device);
        match verify_device(driver, device, size, log_dir, running, &frontend) {
            Ok(passed) => failed |= !passed,
            Err(e) => {
                eprintln!("[{}] {} {}", device, style("Error:").red().bold(), e);
                failed = true;
            }
        }
    }

    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn show_info(driver: &dyn DeviceDriver, running: &AtomicBool, device: &str) -> Result<()> {
    driver.validate_identifier(device)?;

    let title = format!("Drive Information for {}:", device);
    println!("{}", title);
    println!("{}", "=".repeat(title.chars().count()));
    for (field, value) in driver.describe(device)? {
        println!("{:<20}: {}", field, value);
    }
    if driver.is_system_drive(device) {
        println!();
        println!("{}", style("WARNING: This appears to be a SYSTEM DRIVE").red().bold());
        println!("  Formatting this drive is NOT RECOMMENDED");
    }

    println!();
    let perf = "Performance Test:";
    println!("{}", perf);
    println!("{}", "-".repeat(perf.len()));
    println!("Running benchmark...");

    let frontend = TerminalFrontend::new();
    let mut sink = FrontendSink::new(&frontend, device);
    let measurement = benchmark::measure_device(
        driver,
        device,
        &BenchmarkConfig::default(),
        running,
        &mut sink,
    );
    println!(
        "{}",
        benchmark::summary(&measurement.result, &Thresholds::default())
    );
    for note in measurement.advisories() {
        println!("{}", style(note).yellow());
    }
    Ok(())
}

fn eject_drive(driver: &dyn DeviceDriver, device: &str) -> Result<()> {
    driver.validate_identifier(device)?;
    println!("Ejecting {}...", device);
    driver.eject(device)?;
    println!("{}", style("✓ Drive ejected successfully!").green());
    println!("It is now safe to remove the drive.");
    Ok(())
}

fn list_drives(driver: &dyn DeviceDriver) -> Result<()> {
    let devices = driver.list_devices()?;
    if devices.is_empty() {
        println!("No removable devices found.");
        return Ok(());
    }

    println!("Found {} removable devices:", devices.len());
    println!(
        "\n  {:<12} {:<16} {:<10} {}",
        "DEVICE", "LABEL", "SIZE", "LOCATION"
    );
    println!("  {:-<12} {:-<16} {:-<10} {:-<20}", "", "", "", "");
    for device in &devices {
        let location = match &device.mount_point {
            Some(mp) => mp.display().to_string(),
            None => "(Not mounted)".to_string(),
        };
        println!(
            "  {:<12} {:<16} {:>7.1} GB  {}",
            device.id,
            device.label.as_deref().unwrap_or("-"),
            device.size_gb,
            location
        );
        if device.size_gb > LARGE_DRIVE_GB {
            println!(
                "  {}",
                style("WARNING: Drive over 1TB - may not perform well on Pioneer hardware")
                    .yellow()
            );
        }
    }

    let example = driver.example_identifier();
    println!();
    println!("To format a drive, use: cdjf format {}", example);
    println!("For multiple drives: cdjf format {} <device> ...", example);
    Ok(())
}

fn run_profile(store: ProfileStore, command: ProfileCommand) -> Result<()> {
    match command {
        ProfileCommand::Save {
            name,
            label,
            cluster_size,
            extremely_slow,
            very_slow,
            slightly_slow,
            prompt,
            reset_benchmarks,
        } => {
            let update = ProfileUpdate {
                label,
                cluster_size,
                extremely_slow,
                very_slow,
                slightly_slow,
                prompt,
                reset_benchmarks,
            };
            match store.save(&name, &update)? {
                SaveOutcome::Saved(profile) => {
                    println!("Profile {:?} saved.", profile.display_name(&name))
                }
                SaveOutcome::Unchanged(_) => println!("No changes to save."),
            }
        }
        ProfileCommand::List => {
            let names = store.names()?;
            if names.is_empty() {
                println!("No profiles saved yet.");
                return Ok(());
            }
            println!("Saved profiles:");
            for name in names {
                println!("  {}", name);
            }
        }
        ProfileCommand::Show { name } => {
            let profile = store.load_by_name(&name)?;
            println!("Profile {:?}", profile.display_name(&name));
            match profile.label.as_deref().filter(|l| !l.trim().is_empty()) {
                Some(label) => println!("Label: {}", label),
                None => println!("Label: (default)"),
            }
            match profile.cluster_size {
                Some(cluster) => println!("Cluster size: {}", cluster.as_str()),
                None => println!("Cluster size: (default)"),
            }
            if profile.benchmark_thresholds.is_some() {
                println!("Benchmark thresholds:");
            } else {
                println!("Benchmark thresholds: default");
            }
            let thresholds = profile.thresholds();
            println!("  Extremely slow: {:.2} MB/s", thresholds.extremely_slow);
            println!("  Very slow: {:.2} MB/s", thresholds.very_slow);
            println!("  Slightly slow: {:.2} MB/s", thresholds.slightly_slow);
            println!("  Prompt: {:.2} MB/s", thresholds.prompt);
        }
        ProfileCommand::Delete { name } => {
            let profile = store.delete(&name)?;
            println!("Profile {:?} deleted.", profile.display_name(&name));
        }
    }
    Ok(())
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Benchmark and verification loops poll this flag between chunks.
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    // Profiles never touch a device, so they work without a platform driver.
    let command = match cli.command {
        Commands::Profile(command) => {
            run_profile(profile_store(cli.profile_path)?, command)?;
            return Ok(ExitCode::SUCCESS);
        }
        command => command,
    };

    let driver = platform::native()?;
    let driver = driver.as_ref();

    match command {
        Commands::Format {
            devices,
            yes,
            label,
            profile,
            cluster_size,
        } => {
            // Flags win over the profile, the profile over the defaults.
            let profile = match profile {
                Some(name) => {
                    let profile = profile_store(cli.profile_path)?.load_by_name(&name)?;
                    log::info!("using profile {}", profile.display_name(&name));
                    Some(profile)
                }
                None => None,
            };
            let settings =
                FormatSettings::resolve(profile.as_ref(), label.as_deref(), cluster_size);
            format_drives(driver, &running, devices, settings, yes)
        }
        Commands::Verify {
            devices,
            size,
            log_dir,
        } => verify_drives(driver, &running, &devices, size, &log_dir),
        Commands::Info { device } => {
            show_info(driver, &running, &device)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Eject { device } => {
            eject_drive(driver, &device)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::List => {
            list_drives(driver)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Profile(_) => Ok(ExitCode::SUCCESS),
    }
}
