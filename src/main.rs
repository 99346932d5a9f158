//! eSocial client command-line tool.
//!
//! Run with: `esocial-client --config esocial.yaml send S-2220.xml`

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use esocial_client::envelope::DATE_TIME_FORMAT;
use esocial_client::transport::bundled_ca_chain;
use esocial_client::{ClientConfig, ProtocolResult, RawEvent, WsClient};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Send events to and query the eSocial employer web services.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML)
    #[arg(short, long, default_value = "esocial.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign the given event files and send them as one batch
    Send {
        /// Batch group (grupo)
        #[arg(short, long, default_value_t = 1)]
        group: u32,

        /// Print the validated envelope instead of sending it
        #[arg(long)]
        dry_run: bool,

        /// Event documents (unsigned XML)
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Retrieve the processing result of a sent batch
    Retrieve {
        /// Protocol number returned when the batch was sent
        protocol: String,
    },

    /// Query ids of employer-level events
    EmployerIds {
        /// Event type, e.g. S-1000
        event_type: String,

        /// Period, YYYY or YYYY-MM
        period: String,
    },

    /// Query ids of the events of one employee
    EmployeeIds {
        /// Employee CPF (11 digits)
        cpf: String,

        /// Start, YYYY-MM-DDTHH:MM:SS
        start: String,

        /// End, YYYY-MM-DDTHH:MM:SS
        end: String,
    },

    /// Request the download of events by id
    Download {
        /// Event ids
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = args.log_level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!("eSocial client v{}", env!("CARGO_PKG_VERSION"));
    info!("Config file: {}", args.config.display());

    let config = if args.config.exists() {
        let content = tokio::fs::read_to_string(&args.config)
            .await
            .context("Failed to read config file")?;
        ClientConfig::from_yaml_str(&content).context("Failed to parse config file")?
    } else {
        info!("Config file not found, using defaults");
        ClientConfig::default()
    };

    info!(
        target_env = %config.target,
        max_batch_size = config.max_batch_size,
        timeout_secs = config.timeout_secs,
        employer = config.employer.is_some(),
        credential = config.credential.is_some(),
        ca_bundle = config.ca_bundle.is_some(),
        bundled_chain = bundled_ca_chain().is_some(),
        "Configuration loaded"
    );

    let mut client = WsClient::from_config(&config).context("Failed to initialize client")?;

    match args.command {
        Command::Send {
            group,
            dry_run,
            files,
        } => {
            for file in &files {
                let content = tokio::fs::read_to_string(file)
                    .await
                    .with_context(|| format!("Failed to read {}", file.display()))?;
                let raw = RawEvent::parse(&content)
                    .with_context(|| format!("Invalid event document {}", file.display()))?;
                let id = client
                    .add_event(raw)
                    .with_context(|| format!("Rejected event {}", file.display()))?;
                info!(file = %file.display(), event_id = %id, "Event added");
            }

            if dry_run {
                let envelope = client.prepare_send_batch(group)?;
                println!("{}", envelope.to_document_string());
            } else {
                let result = client.send_events_batch(group).await?;
                print_result(&result);
                client.clear_batch();
            }
        }
        Command::Retrieve { protocol } => {
            let result = client.retrieve_events_batch(&protocol).await?;
            print_result(&result);
        }
        Command::EmployerIds { event_type, period } => {
            let result = client.obtain_employer_ids(&event_type, &period).await?;
            print_result(&result);
        }
        Command::EmployeeIds { cpf, start, end } => {
            let start = parse_date_time(&start)?;
            let end = parse_date_time(&end)?;
            let result = client.obtain_employee_ids(&cpf, start, end).await?;
            print_result(&result);
        }
        Command::Download { ids } => {
            let result = client.download_events_by_ids(&ids).await?;
            print_result(&result);
        }
    }

    Ok(())
}

fn parse_date_time(value: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, DATE_TIME_FORMAT)
        .with_context(|| format!("Invalid date-time {value:?}, expected YYYY-MM-DDTHH:MM:SS"))
}

fn print_result(result: &ProtocolResult) {
    info!(
        operation = %result.operation(),
        response_code = ?result.response_code(),
        description = ?result.response_description(),
        protocol = ?result.protocol_number(),
        "Response received"
    );
    println!("{}", result.document().to_document_string());
}
