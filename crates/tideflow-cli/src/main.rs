//! tideflow CLI — register workflows and drive processes from the shell.
//!
//! Every command opens the SQLite database named by `--db`, builds an
//! engine over it and prints its result as JSON.

use clap::{Parser, Subcommand};
use serde_json::Value;
use tideflow_cli::commands::{self, parse_json_arg, print_json};

/// tideflow CLI — workflow and process orchestration
#[derive(Parser)]
#[command(name = "tideflow", version, about = "tideflow CLI — workflow and process orchestration")]
pub struct Cli {
    /// Path to the SQLite database file
    #[arg(long, env = "TIDEFLOW_DB_PATH", default_value = "tideflow.db")]
    db: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage workflow blueprints
    Workflow {
        #[command(subcommand)]
        action: WorkflowAction,
    },

    /// Create, run and inspect processes
    Process {
        #[command(subcommand)]
        action: ProcessAction,
    },

    /// List and complete activities
    Activity {
        #[command(subcommand)]
        action: ActivityAction,
    },

    /// Timer maintenance
    Timers {
        #[command(subcommand)]
        action: TimersAction,
    },

    /// Poll timers and queued messages until Ctrl+C
    Worker,
}

#[derive(Subcommand)]
enum WorkflowAction {
    /// Register a blueprint file (JSON or YAML) as a new workflow version
    Register {
        /// Workflow name
        #[arg(long)]
        name: String,
        /// Path to the blueprint file
        file: String,
        /// Optional description
        #[arg(long)]
        description: Option<String>,
    },
    /// Validate a blueprint file without registering it
    Validate {
        /// Path to the blueprint file
        file: String,
    },
    /// List registered workflows
    List,
}

#[derive(Subcommand)]
enum ProcessAction {
    /// Create a process from the latest version of a workflow
    Create {
        /// Workflow name
        #[arg(long)]
        workflow: String,
        /// Actor data (JSON)
        #[arg(long, default_value = "{}")]
        actor: String,
        /// Initial bag (JSON)
        #[arg(long, default_value = "{}")]
        bag: String,
    },
    /// Run or resume a process
    Run {
        /// Process ID
        id: String,
        /// Actor data (JSON)
        #[arg(long, default_value = "{}")]
        actor: String,
        /// External input (JSON)
        #[arg(long, default_value = "{}")]
        input: String,
    },
    /// Schedule an abort for one or more processes
    Abort {
        /// Process IDs
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Show a process record
    Get {
        /// Process ID
        id: String,
    },
    /// List processes
    List {
        /// Filters (JSON), e.g. '{"current_status":"WAITING","limit":10}'
        #[arg(long, default_value = "{}")]
        filters: String,
    },
    /// Show every state a process has written
    History {
        /// Process ID
        id: String,
    },
    /// Park a process in PENDING with a manually supplied state
    SetState {
        /// Process ID
        id: String,
        /// State (JSON) with optional bag, result and next_node_id
        #[arg(long)]
        state: String,
    },
}

#[derive(Subcommand)]
enum ActivityAction {
    /// List activity managers of a process
    List {
        /// Process ID
        #[arg(long)]
        process_id: String,
    },
    /// Submit an activity and resume the waiting process
    Complete {
        /// Activity manager ID
        id: String,
        /// Actor data (JSON)
        #[arg(long, default_value = "{}")]
        actor: String,
        /// Activity data (JSON)
        #[arg(long, default_value = "{}")]
        data: String,
    },
}

#[derive(Subcommand)]
enum TimersAction {
    /// Fire every timer that is due now
    Fire,
}

async fn dispatch(db: &str, command: Commands) -> Result<Option<Value>, String> {
    let engine = commands::init_engine(db)?;
    let output = match command {
        Commands::Workflow { action } => match action {
            WorkflowAction::Register {
                name,
                file,
                description,
            } => commands::workflow::register(&engine, &name, &file, description.as_deref()).await?,
            WorkflowAction::Validate { file } => commands::workflow::validate(&file)?,
            WorkflowAction::List => commands::workflow::list(&engine).await?,
        },

        Commands::Process { action } => match action {
            ProcessAction::Create {
                workflow,
                actor,
                bag,
            } => {
                commands::process::create(
                    &engine,
                    &workflow,
                    parse_json_arg("actor", &actor)?,
                    parse_json_arg("bag", &bag)?,
                )
                .await?
            }
            ProcessAction::Run { id, actor, input } => {
                commands::process::run(
                    &engine,
                    &id,
                    parse_json_arg("actor", &actor)?,
                    parse_json_arg("input", &input)?,
                )
                .await?
            }
            ProcessAction::Abort { ids } => commands::process::abort(&engine, &ids).await?,
            ProcessAction::Get { id } => commands::process::get(&engine, &id).await?,
            ProcessAction::List { filters } => {
                commands::process::list(&engine, parse_json_arg("filters", &filters)?).await?
            }
            ProcessAction::History { id } => commands::process::history(&engine, &id).await?,
            ProcessAction::SetState { id, state } => {
                commands::process::set_state(&engine, &id, parse_json_arg("state", &state)?)
                    .await?
            }
        },

        Commands::Activity { action } => match action {
            ActivityAction::List { process_id } => {
                commands::activity::list(&engine, &process_id).await?
            }
            ActivityAction::Complete { id, actor, data } => {
                commands::activity::complete(
                    &engine,
                    &id,
                    parse_json_arg("actor", &actor)?,
                    parse_json_arg("data", &data)?,
                )
                .await?
            }
        },

        Commands::Timers { action } => match action {
            TimersAction::Fire => commands::timers::fire(&engine).await?,
        },

        Commands::Worker => {
            commands::worker::run(engine).await?;
            return Ok(None);
        }
    };
    Ok(Some(output))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tideflow_core=info,tideflow_cli=info".into()),
        )
        .init();

    let result = if let Some(command) = cli.command {
        dispatch(&cli.db, command).await.map(|output| {
            if let Some(output) = output {
                print_json(&output);
            }
        })
    } else {
        // No subcommand — show help
        use clap::CommandFactory;
        Cli::command().print_help().ok();
        println!();
        Ok(())
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
