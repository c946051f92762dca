mod loopback;

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    sync::{Arc, Weak},
    thread,
    time::{Duration, Instant},
};

use clap::{Parser, Subcommand, ValueEnum};
use otp_tester_core::{
    Address, ConsumerComponentDelegate, ConsumerModel, Fade, FadePattern, Log, Module,
    ModuleIdentifier, ProducerComponentDelegate, ProducerModel, TesterConfig, TesterError,
};
use tracing_subscriber::EnvFilter;

use crate::loopback::Loopback;

fn main() -> otp_tester_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            duration,
            pattern,
            points,
            system,
            interface,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            run_simulate(
                &config,
                Duration::from_secs(duration),
                pattern.into(),
                points,
                system,
                &interface,
            )
        }
        Commands::Sample {
            pattern,
            ticks,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            run_sample(&config, pattern.into(), ticks);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> otp_tester_core::Result<TesterConfig> {
    match path {
        Some(path) => {
            tracing::info!(?path, "loading configuration");
            TesterConfig::from_json_file(path)
        }
        None => Ok(TesterConfig::default()),
    }
}

fn run_simulate(
    config: &TesterConfig,
    duration: Duration,
    pattern: FadePattern,
    count: u32,
    system: u8,
    interface: &str,
) -> otp_tester_core::Result<()> {
    tracing::info!(%pattern, count, system, ?duration, "starting loopback simulation");

    let log = Log::new(&config.log)?;
    let (loopback, delivery) = Loopback::spawn()?;
    let producer = ProducerModel::new(loopback.producer(), config, log.clone())?;
    let consumer = ConsumerModel::new(loopback.consumer(), config, log.clone())?;
    let producer_delegate: Weak<dyn ProducerComponentDelegate> = Arc::<ProducerModel>::downgrade(&producer);
    let consumer_delegate: Weak<dyn ConsumerComponentDelegate> = Arc::<ConsumerModel>::downgrade(&consumer);
    loopback.connect(producer_delegate, consumer_delegate);
    drop(loopback);

    consumer.add_module_types(&ModuleIdentifier::ALL);
    consumer.observe_system_numbers(BTreeSet::from([system]));
    consumer.set_interface(Some(interface.to_string()));
    consumer.start();

    producer.set_interface(Some(interface.to_string()));
    producer.start();
    if !producer.is_started() || !consumer.is_started() {
        return Err(TesterError::msg(format!(
            "could not start on interface {interface:?}"
        )));
    }

    let base = pattern.module_identifier();
    let priority = config.producer.default_priority;
    for number in 1..=count {
        let address = Address::new(system, 1, number);
        if !producer.add_point(address, priority, format!("Fade {number}")) {
            continue;
        }
        producer.add_module(Module::default_for(base), address, priority);
        if let Some(companion) = base.dependent() {
            producer.add_module(Module::default_for(companion), address, priority);
        }
        producer.start_fade(address, priority, pattern);
    }

    let started = Instant::now();
    while started.elapsed() < duration {
        thread::sleep(Duration::from_secs(1).min(duration));
        report(&consumer);
    }

    for fade in producer.active_fades() {
        producer.stop_fade(fade.address, fade.priority);
    }
    producer.stop();
    consumer.stop();
    log.flush();
    tracing::info!(messages = log.len(), "simulation finished");

    drop(producer);
    drop(consumer);
    if delivery.join().is_err() {
        tracing::warn!("loopback delivery thread panicked");
    }
    Ok(())
}

fn report(consumer: &ConsumerModel) {
    let producers = consumer.producers();
    tracing::info!(
        producers = producers.len(),
        points = consumer.points().len(),
        "consumer snapshot"
    );
    for point in consumer.points() {
        let modules: Vec<String> = point
            .modules
            .iter()
            .map(|module| format!("{:#06x}={module:?}", module.identifier().number()))
            .collect();
        println!(
            "{} [{}] {:<12} {}",
            point.address,
            point.priority,
            point.name,
            modules.join(" ")
        );
    }
}

fn run_sample(config: &TesterConfig, pattern: FadePattern, ticks: u32) {
    let mut fade = Fade::with_config(Address::new(1, 1, 1), 100, pattern, &config.fade);
    println!("{:>6} {:>12} {:>12} {:>14}", "tick", "location", "velocity", "acceleration");
    for tick in 1..=ticks {
        fade.advance();
        println!(
            "{:>6} {:>12} {:>12} {:>14}",
            tick,
            fade.location(),
            fade.velocity(),
            fade.acceleration()
        );
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "OTP producer and consumer tester", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run fades on a producer wired to a consumer over an in-process loopback.
    Simulate {
        /// How long to run, in seconds.
        #[arg(short, long, default_value_t = 5)]
        duration: u64,
        #[arg(short, long, value_enum, default_value_t = PatternArg::PositionBounce)]
        pattern: PatternArg,
        /// Number of points to create and fade.
        #[arg(short = 'n', long, default_value_t = 4)]
        points: u32,
        #[arg(short, long, default_value_t = 1)]
        system: u8,
        #[arg(short, long, default_value = "lo")]
        interface: String,
        /// Optional JSON configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print the values a single fade produces, tick by tick.
    Sample {
        #[arg(short, long, value_enum, default_value_t = PatternArg::PositionForward)]
        pattern: PatternArg,
        #[arg(short, long, default_value_t = 20)]
        ticks: u32,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PatternArg {
    PositionForward,
    PositionReverse,
    PositionBounce,
    RotateForward,
    RotateReverse,
}

impl From<PatternArg> for FadePattern {
    fn from(value: PatternArg) -> Self {
        match value {
            PatternArg::PositionForward => Self::PositionForward,
            PatternArg::PositionReverse => Self::PositionReverse,
            PatternArg::PositionBounce => Self::PositionBounce,
            PatternArg::RotateForward => Self::RotateForward,
            PatternArg::RotateReverse => Self::RotateReverse,
        }
    }
}
