//! Busway CLI binary.
//!
//! Bus-service session bootstrap and method dispatch.
//!
//! # Commands
//!
//! - `describe` - Print the sample interface descriptor table
//! - `call` - Dispatch one method call locally
//! - `demo` - Bootstrap the sample service over a loopback bus and drive it

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use busway::{
    bus::MemoryBus,
    config::Config,
    demo,
    dispatch::{Dispatcher, MethodCall, MethodReply},
    BuswayError, ServiceBootstrap, SessionPort, VERSION,
};

#[derive(Parser)]
#[command(name = "busway")]
#[command(version = VERSION)]
#[command(about = "Busway - bus-service session bootstrap and method dispatch", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the sample interface descriptor table as JSON
    Describe {
        /// Pretty-print the JSON
        #[arg(long)]
        pretty: bool,
    },

    /// Dispatch one method call against the sample object, locally
    Call {
        /// Method name (Ping, Concatenate, Fibonacci, Pi)
        method: String,

        /// Positional arguments (parsed as JSON, else taken as strings)
        args: Vec<String>,
    },

    /// Bootstrap the sample service over a loopback bus, let a synthetic
    /// peer join, and fire a mixed concurrent/serialized call burst
    Demo {
        /// Well-known name to claim and advertise
        #[arg(short, long)]
        name: Option<String>,

        /// Session contact port
        #[arg(short, long)]
        port: Option<u16>,

        /// Iterations for the long-running Pi call
        #[arg(long, default_value = "2000000")]
        pi_iterations: u64,

        /// Seconds to wait for the peer to join
        #[arg(long, default_value = "10")]
        join_timeout: u64,

        /// Config file path (default: the standard config location)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Enable verbose logging
        #[arg(short, long)]
        verbose: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Describe { pretty } => cmd_describe(pretty),
        Commands::Call { method, args } => cmd_call(&method, &args),
        Commands::Demo {
            name,
            port,
            pi_iterations,
            join_timeout,
            config,
            verbose,
        } => cmd_demo(name, port, pi_iterations, join_timeout, config, verbose),
    }
}

fn cmd_describe(pretty: bool) -> anyhow::Result<()> {
    let interface = demo::sample_interface()?;
    let json = if pretty {
        serde_json::to_string_pretty(&interface)?
    } else {
        serde_json::to_string(&interface)?
    };
    println!("{json}");
    Ok(())
}

fn cmd_call(method: &str, args: &[String]) -> anyhow::Result<()> {
    let dispatcher = Dispatcher::new();
    dispatcher.register(demo::sample_object("/service")?)?;

    let mut call = MethodCall::new("/service", method);
    for arg in args {
        // Bare words are strings; anything that parses as JSON is passed through.
        let value = serde_json::from_str(arg)
            .unwrap_or_else(|_| serde_json::Value::String(arg.clone()));
        call = call.arg(value);
    }

    let runtime = tokio::runtime::Runtime::new()?;
    let reply = runtime.block_on(dispatcher.dispatch(&call))?;

    match reply {
        Some(MethodReply::Values(values)) => {
            println!("{}", serde_json::to_string(&values)?);
        }
        Some(MethodReply::Fault(fault)) => {
            eprintln!("fault {}: {}", fault.name, fault.message);
        }
        None => println!("(no reply)"),
    }
    Ok(())
}

fn cmd_demo(
    name: Option<String>,
    port: Option<u16>,
    pi_iterations: u64,
    join_timeout: u64,
    config_path: Option<PathBuf>,
    verbose: bool,
) -> anyhow::Result<()> {
    let log_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    // File config, then env overrides, then CLI flags on top.
    let file_config = match config_path {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };
    let mut config = file_config.merge(Config::from_env());
    if let Some(name) = name {
        config.service.well_known_name = name;
    }
    if let Some(port) = port {
        config.service.contact_port = port;
    }

    let runtime = tokio::runtime::Runtime::new()?;
    if let Err(err) = runtime.block_on(run_demo(config, pi_iterations, join_timeout)) {
        tracing::error!("{err}");
        std::process::exit(err.exit_code());
    }
    Ok(())
}

async fn run_demo(
    config: Config,
    pi_iterations: u64,
    join_timeout: u64,
) -> busway::Result<()> {
    let bus = Arc::new(MemoryBus::new(&config.bus.address));
    let service = config.service.clone();
    let options = service.session_options();
    let port = SessionPort(service.contact_port);

    let mut bootstrap = ServiceBootstrap::new(Arc::clone(&bus));
    bootstrap.register_object(demo::sample_object(&service.object_path)?)?;

    // Synthetic peer: wait for the advertisement, then join and call.
    let joiner_bus = Arc::clone(&bus);
    let joiner_name = format!(":2.{}", uuid::Uuid::new_v4().simple());
    let well_known = service.well_known_name.clone();
    let object_path = service.object_path.clone();
    let joiner = tokio::spawn(async move {
        while !joiner_bus.is_advertised(&well_known) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let info = joiner_bus.join_session(&joiner_name, port, options)?;
        tracing::info!("joined session {} as {}", info.session_id, joiner_name);

        let burst = vec![
            MethodCall::new(&object_path, "Pi").arg(pi_iterations),
            MethodCall::new(&object_path, "Ping").arg("hello"),
            MethodCall::new(&object_path, "Concatenate").arg("bus").arg("way"),
            MethodCall::new(&object_path, "Fibonacci").arg(42),
        ];
        let replies = futures::future::join_all(
            burst
                .iter()
                .map(|call| joiner_bus.call(info.session_id, call)),
        )
        .await;

        for (call, reply) in burst.iter().zip(replies) {
            match reply? {
                Some(MethodReply::Values(values)) => {
                    tracing::info!("{} -> {}", call.method, serde_json::Value::from(values));
                }
                Some(MethodReply::Fault(fault)) => {
                    tracing::warn!("{} faulted: {}: {}", call.method, fault.name, fault.message);
                }
                None => tracing::info!("{} -> (no reply)", call.method),
            }
        }
        Ok::<_, BuswayError>(())
    });

    let session = bootstrap
        .run(
            &service.well_known_name,
            port,
            options,
            Some(Duration::from_secs(join_timeout)),
        )
        .await?;
    tracing::info!(
        "session {} active with {}; serving",
        session.session_id,
        session.joiner
    );

    joiner
        .await
        .map_err(|err| BuswayError::Protocol(format!("joiner task aborted: {err}")))??;

    tracing::info!("demo complete: {} session(s) served", bus.session_count());
    Ok(())
}
