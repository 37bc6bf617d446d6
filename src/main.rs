use chrono::{Local, Utc};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use panda_expense::spend_report::{format_money, CURRENCY};
use panda_expense::{
    build_spend_report, collect_orders, load_orders, save_orders, BatchOutcome, Config,
    EmlMailbox, Error, GmailFetcher, MessageFetcher, Order, MAX_MESSAGES_CAP,
};
use serde_json::json;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// Food-delivery expense tracker built from order-confirmation emails.
#[derive(Parser, Debug)]
#[command(name = "panda-expense")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (defaults apply when it does not exist)
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch order emails from Gmail (token in GMAIL_ACCESS_TOKEN) and report spending
    Analyze(PipelineArgs),

    /// Run the same pipeline over a directory of saved .eml files
    ImportEml {
        /// Directory (or single file) holding .eml messages
        path: PathBuf,
        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Report spending from a previously saved CSV cache
    Report {
        /// CSV written by --cache
        cache: PathBuf,
        /// Print JSON instead of a text summary
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
struct PipelineArgs {
    /// Sender address to search for
    #[arg(long)]
    sender: Option<String>,

    /// Lookback window in days
    #[arg(long)]
    days: Option<u32>,

    /// Maximum number of messages to process (hard cap 1000)
    #[arg(long)]
    max: Option<usize>,

    /// Save extracted orders to this CSV file
    #[arg(long)]
    cache: Option<PathBuf>,

    /// Print JSON instead of a text summary
    #[arg(long)]
    json: bool,
}

impl PipelineArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(sender) = self.sender.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            config.mailbox.sender = sender.to_string();
        }
        if let Some(days) = self.days.filter(|d| *d > 0) {
            config.mailbox.lookback_days = days;
        }
        if let Some(max) = self.max.filter(|m| *m > 0) {
            if max > MAX_MESSAGES_CAP {
                warn!(requested = max, cap = MAX_MESSAGES_CAP, "--max above cap; clamped");
            }
            config.mailbox.max_messages = max.min(MAX_MESSAGES_CAP);
        }
    }
}

fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::with_template("{bar:40.magenta/white} {pos}/{len} emails  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb
}

fn print_report(config: &Config, orders: &[Order], as_json: bool) -> Result<(), Error> {
    let report = build_spend_report(orders, &config.report_options(), Local::now().date_naive());
    if as_json {
        let columns = orders.iter().collect::<panda_expense::OrderColumns>();
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "columns": columns,
                "report": report,
            }))?
        );
    } else {
        print!("{report}");
    }
    Ok(())
}

fn run_pipeline(
    fetcher: &dyn MessageFetcher,
    config: &Config,
    pipeline: &PipelineArgs,
) -> Result<(), Error> {
    let request = config.batch_request();
    let extractor = config.extractor();
    info!(
        sender = %request.sender,
        days = request.lookback_days,
        max = request.max_messages,
        "analyzing orders"
    );

    let pb = progress_bar();
    let outcome = collect_orders(fetcher, &extractor, &request, Utc::now(), |p| {
        pb.set_length(p.total as u64);
        pb.set_position(p.processed as u64);
        pb.set_message(format!("running total {CURRENCY} {}", format_money(p.running_total)));
    });
    pb.finish_and_clear();

    let batch = match outcome {
        Ok(BatchOutcome::Completed(batch)) => batch,
        Ok(BatchOutcome::NoMessages) => {
            println!(
                "No orders found from {} in the last {} days.",
                request.sender, request.lookback_days
            );
            return Ok(());
        }
        Err(e) => {
            if !e.partial.is_empty() {
                warn!(discarded = e.partial.len(), "discarding orders from failed batch");
            }
            return Err(e.into());
        }
    };

    if let Some(path) = &pipeline.cache {
        save_orders(path, &batch.orders)?;
    }
    print_report(config, &batch.orders, pipeline.json)
}

fn run(cli: Cli, mut config: Config) -> Result<(), Error> {
    match cli.command {
        Commands::Analyze(pipeline) => {
            pipeline.apply(&mut config);
            let fetcher = GmailFetcher::from_env(&config.gmail.api_base)?;
            run_pipeline(&fetcher, &config, &pipeline)
        }
        Commands::ImportEml { path, pipeline } => {
            pipeline.apply(&mut config);
            let mailbox = EmlMailbox::open(&path)?;
            run_pipeline(&mailbox, &config, &pipeline)
        }
        Commands::Report { cache, json } => {
            let orders = load_orders(&cache)?;
            print_report(&config, &orders, json)
        }
    }
}

fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match Config::load_or_default(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            std::process::exit(1);
        }
    };
    config.init_logging();

    if let Err(e) = run(cli, config) {
        error!(error = %e, "panda-expense failed");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
