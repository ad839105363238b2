mod commands;

use clap::{Parser, Subcommand};
use shared::config::Config;
use shared::store::mongo::MongoStore;
use tracing::error;

#[derive(Parser)]
#[command(name = "campaign-dispatcher")]
#[command(about = "Outbound campaign email dispatcher")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create all MongoDB indexes.
    InitIndexes,
    /// Run the global dispatcher once across every active campaign.
    RunDispatcher {
        #[arg(long, default_value_t = 20)]
        batch_size: i64,
        #[arg(long)]
        verbose: bool,
    },
    /// Run the dispatcher on a fixed tick until Ctrl-C.
    RunContinuous {
        #[arg(long)]
        tick_seconds: Option<u64>,
        #[arg(long)]
        batch_size: Option<i64>,
    },
    /// Run one worker batch for a single campaign.
    RunWorker {
        campaign: String,
        #[arg(long, default_value_t = 20)]
        batch_size: i64,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        since: Option<String>,
    },
    /// Add default progress to leads in a campaign that don't have any yet.
    BackfillProgress { campaign: String },
    /// Rebuild a mailbox's sent_count for one day from the Activity log.
    RecountRuntime { mailbox: String, date: String },
    /// List email accounts (mailboxes).
    ListAccounts,
    /// List campaigns.
    ListCampaigns,
    /// List leads for a campaign.
    ListLeads { campaign: String },
    /// Show leads currently due for a campaign.
    ShowDueLeads {
        campaign: String,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Show one lead's recipients and progress.
    ShowLeadDetails { lead: String },
    /// Print every account_runtime_state record with its current status.
    CheckRuntimeStates,
    /// Repair account_runtime_state records with an implausible next_available_at.
    FixRuntimeStates,
    /// Force a lead's next_due_at to now.
    MakeLeadDueNow { lead: String },
    /// Reset a lead's progress and recipient statuses to the beginning of the sequence.
    ResetLeadProgress { lead: String },
    /// Sync lead_data recipient statuses from progress.processed_recipients.
    UpdateLeadStatuses { campaign: String },
    /// Render a campaign's next due (or given) lead without sending anything.
    DebugTemplate {
        campaign: String,
        #[arg(long)]
        lead: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to read configuration: {err}");
            std::process::exit(1);
        }
    };

    let verbose = config.verbose() || matches!(&cli.command, Commands::RunDispatcher { verbose: true, .. });
    init_logging(verbose);

    let store = match MongoStore::connect(&config.mongo_uri, &config.db_name, config.mongo_max_pool_size).await {
        Ok(store) => store,
        Err(err) => {
            error!("failed to connect to mongo: {err}");
            std::process::exit(1);
        }
    };

    let outcome = commands::dispatch(cli.command, &config, store).await;
    if let Err(err) = outcome {
        error!("command failed: {err}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "cli=info,worker=info,shared=info".to_string());
    if verbose {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
