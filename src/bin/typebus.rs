use clap::{command, Parser};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use typebus::{
    BusConfig, BusError, DispatchMode, Event, EventBus, FailureChannel, HandlerResult,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Dispatch mode: sync or async
    #[arg(short, long)]
    mode: Option<DispatchMode>,

    /// Path to a JSON bus config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug mode
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone)]
struct UserLoggedIn {
    user: String,
}

impl Event for UserLoggedIn {
    fn validate(&self) -> Result<(), String> {
        if self.user.trim().is_empty() {
            return Err("user must not be blank".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct OrderPlaced {
    order_id: u64,
    amount_cents: u64,
}

impl Event for OrderPlaced {}

fn greet(event: &UserLoggedIn) -> HandlerResult {
    println!("[greeter] welcome back, {}", event.user);
    Ok(())
}

fn audit(event: &UserLoggedIn) -> HandlerResult {
    println!("[audit] login recorded for {}", event.user);
    Ok(())
}

fn bill(event: &OrderPlaced) -> HandlerResult {
    if event.amount_cents == 0 {
        return Err(format!("order {} has no amount", event.order_id).into());
    }
    println!(
        "[billing] charging {}.{:02} for order {}",
        event.amount_cents / 100,
        event.amount_cents % 100,
        event.order_id
    );
    Ok(())
}

async fn run(cli: &Cli) -> Result<(), BusError> {
    let mut config = match &cli.config {
        Some(path) => BusConfig::from_file(path)?,
        None => BusConfig::default(),
    };
    if let Some(mode) = cli.mode {
        config.dispatch_mode = mode;
        if mode == DispatchMode::Sync {
            config.handler_timeout = None;
        }
    }
    debug!("config: {:?}", config);

    let failures = FailureChannel::default();
    let mut reports = failures.subscribe();
    let bus = EventBus::builder()
        .config(config)
        .failure_sink(failures)
        .build()?;
    info!(mode = %bus.dispatch_mode(), "Event bus ready");

    let greeter = bus.subscribe_named("greeter", greet);
    bus.subscribe_named("audit", audit);
    bus.subscribe_named("billing", bill);

    bus.publish(UserLoggedIn {
        user: "Alice".to_string(),
    })?;
    bus.publish(OrderPlaced {
        order_id: 1,
        amount_cents: 4200,
    })?;
    bus.publish(OrderPlaced {
        order_id: 2,
        amount_cents: 0,
    })?;
    bus.flush().await?;

    bus.unsubscribe(&greeter);
    println!("greeter unsubscribed");
    bus.publish(UserLoggedIn {
        user: "Bob".to_string(),
    })?;

    if let Err(e) = bus.publish(UserLoggedIn {
        user: " ".to_string(),
    }) {
        println!("rejected: {}", e);
    }

    bus.flush().await?;
    while let Some(failure) = reports.try_recv() {
        println!("handler failure: {}", failure);
    }

    bus.shutdown().await;
    println!("bus shut down");
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("typebus=debug")
    } else {
        EnvFilter::from_default_env()
    };
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    if let Err(e) = run(&cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
