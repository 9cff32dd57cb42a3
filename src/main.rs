//! # Patty CLI (`patty`)
//!
//! Creates extraction, classification and adaptation work, runs the
//! submission daemon that performs it, and reviews the results.
//!
//! ## Usage
//!
//! ```bash
//! patty --config ./config/patty.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `patty init` | Create the SQLite database and run schema migrations |
//! | `patty stats` | Row counts and per-stage backlog |
//! | `patty schema` | Print the JSON schema of an exercise type |
//! | `patty upload-pdf <file>` | Store a PDF and register it by SHA-256 |
//! | `patty textbook <title>` | Create a textbook |
//! | `patty extract <sha256>` | Queue page extractions for a page range |
//! | `patty classify <file>` | Queue a classification batch |
//! | `patty adapt <file>` | Queue an adaptation batch |
//! | `patty adjust <id> <prompt>` | Ask the model to revise an adaptation |
//! | `patty edit <id>` | Set or clear an adaptation's manual edit |
//! | `patty approve <id>` | Approve an adaptation, or withdraw approval |
//! | `patty lineage <entity> <id>` | Show where a record comes from |
//! | `patty export` | Export approved adaptations as JSON |
//! | `patty run-submission-daemon` | Run the pipeline until Ctrl-C |
//!
//! ## Examples
//!
//! ```bash
//! patty init
//! patty upload-pdf ./scans/grammaire-ce2.pdf
//! patty extract 3b5d... --first-page 12 --pages 4 --prompt-file ./prompts/extract.txt --model dummy-1 --run-classification
//! patty adapt ./exercises.json --settings ./settings/qcm.json --model openai:gpt-4o-2024-08-06
//! patty run-submission-daemon --adaptation-parallelism 4
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use patty::commands::{self, ExtractCommand};
use patty::config;
use patty::daemon::{self, DaemonOptions};
use patty::export;
use patty::migrate;
use patty::stats;

/// Patty: extraction, classification and adaptation of textbook exercises.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/patty.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "patty",
    about = "Patty — extract, classify and adapt textbook exercises with LLMs",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/patty.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// Show row counts and the backlog of each pipeline stage.
    Stats,

    /// Print the JSON schema of an exercise type.
    Schema {
        /// JSON file of per-role capability flags. Everything enabled when absent.
        #[arg(long)]
        capabilities: Option<PathBuf>,

        /// Inline definitions, unrolling recursive components this many levels.
        #[arg(long)]
        unfold: Option<usize>,
    },

    /// Store a PDF in the blob store and register it.
    UploadPdf {
        path: PathBuf,
    },

    /// Create a textbook.
    Textbook {
        title: String,

        #[arg(long)]
        publisher: Option<String>,

        #[arg(long)]
        year: Option<i64>,

        #[arg(long)]
        isbn: Option<String>,

        #[arg(long, default_value = "cli")]
        user: String,
    },

    /// Queue one page extraction per page of a PDF range.
    ///
    /// With `--textbook`, exercises are located in that textbook and always
    /// classified.
    Extract {
        /// SHA-256 of an uploaded PDF.
        pdf: String,

        #[arg(long, default_value_t = 1)]
        first_page: i64,

        /// Number of pages. Up to the end of the PDF when absent.
        #[arg(long)]
        pages: Option<i64>,

        #[arg(long)]
        prompt_file: PathBuf,

        /// `dummy-1`, `openai:<name>` or `mistral:<name>`.
        #[arg(long)]
        model: String,

        #[arg(long)]
        run_classification: bool,

        /// Adapt classified exercises with this model.
        #[arg(long)]
        model_for_adaptation: Option<String>,

        #[arg(long)]
        textbook: Option<i64>,

        /// Textbook page number of `--first-page`. Defaults to `--first-page`.
        #[arg(long)]
        first_textbook_page: Option<i64>,

        #[arg(long, default_value = "cli")]
        user: String,
    },

    /// Queue a classification batch from a JSON list of exercises.
    Classify {
        input: PathBuf,

        #[arg(long)]
        model_for_adaptation: Option<String>,

        #[arg(long, default_value = "cli")]
        user: String,
    },

    /// Queue an adaptation batch from a JSON list of exercises.
    Adapt {
        input: PathBuf,

        /// JSON file: `{identity?, system_prompt, response_specification}`.
        #[arg(long)]
        settings: PathBuf,

        #[arg(long)]
        model: String,

        #[arg(long, default_value = "cli")]
        user: String,
    },

    /// Ask the model to revise an adaptation.
    Adjust {
        adaptation: i64,
        prompt: String,
    },

    /// Replace an adaptation's exercise with a hand-edited one.
    Edit {
        adaptation: i64,

        /// JSON file holding the edited exercise.
        #[arg(long, conflicts_with = "clear", required_unless_present = "clear")]
        file: Option<PathBuf>,

        /// Remove the manual edit.
        #[arg(long)]
        clear: bool,
    },

    /// Approve an adaptation for export.
    Approve {
        adaptation: i64,

        #[arg(long, default_value = "cli")]
        user: String,

        /// Withdraw approval instead.
        #[arg(long)]
        revoke: bool,
    },

    /// Show the user or batch a record originates from.
    Lineage {
        /// `adaptation`, `exercise`, `chunk`, `page-extraction` or `class`.
        entity: String,
        id: i64,
    },

    /// Export approved adaptations as JSON.
    Export {
        /// Only exercises located in this textbook.
        #[arg(long)]
        textbook: Option<i64>,

        /// Output file. Stdout when absent.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Run the submission daemon until Ctrl-C.
    RunSubmissionDaemon {
        #[arg(long)]
        extraction_parallelism: Option<usize>,

        #[arg(long)]
        classification_parallelism: Option<usize>,

        #[arg(long)]
        adaptation_parallelism: Option<usize>,

        /// Seconds to sleep between ticks.
        #[arg(long)]
        pause: Option<f64>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Schema {
        capabilities,
        unfold,
    } = &cli.command
    {
        commands::run_schema(capabilities.as_deref(), *unfold)?;
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Schema { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
        Commands::UploadPdf { path } => {
            commands::run_upload_pdf(&cfg, &path).await?;
        }
        Commands::Textbook {
            title,
            publisher,
            year,
            isbn,
            user,
        } => {
            commands::run_create_textbook(
                &cfg,
                &user,
                &title,
                publisher.as_deref(),
                year,
                isbn.as_deref(),
            )
            .await?;
        }
        Commands::Extract {
            pdf,
            first_page,
            pages,
            prompt_file,
            model,
            run_classification,
            model_for_adaptation,
            textbook,
            first_textbook_page,
            user,
        } => {
            commands::run_extract(
                &cfg,
                &ExtractCommand {
                    created_by: user,
                    pdf_sha256: pdf,
                    first_page,
                    pages,
                    prompt_file,
                    model,
                    run_classification,
                    model_for_adaptation,
                    textbook,
                    first_textbook_page,
                },
            )
            .await?;
        }
        Commands::Classify {
            input,
            model_for_adaptation,
            user,
        } => {
            commands::run_classify(&cfg, &user, &input, model_for_adaptation.as_deref()).await?;
        }
        Commands::Adapt {
            input,
            settings,
            model,
            user,
        } => {
            commands::run_adapt(&cfg, &user, &input, &settings, &model).await?;
        }
        Commands::Adjust { adaptation, prompt } => {
            commands::run_adjust(&cfg, adaptation, &prompt).await?;
        }
        Commands::Edit {
            adaptation,
            file,
            clear,
        } => {
            let file = if clear { None } else { file };
            commands::run_edit(&cfg, adaptation, file.as_deref()).await?;
        }
        Commands::Approve {
            adaptation,
            user,
            revoke,
        } => {
            let username = if revoke { None } else { Some(user.as_str()) };
            commands::run_approve(&cfg, adaptation, username).await?;
        }
        Commands::Lineage { entity, id } => {
            commands::run_lineage(&cfg, &entity, id).await?;
        }
        Commands::Export { textbook, output } => {
            export::run_export(&cfg, textbook, output.as_deref()).await?;
        }
        Commands::RunSubmissionDaemon {
            extraction_parallelism,
            classification_parallelism,
            adaptation_parallelism,
            pause,
        } => {
            let mut daemon_config = cfg.daemon.clone();
            if let Some(n) = extraction_parallelism {
                daemon_config.extraction_parallelism = n;
            }
            if let Some(n) = classification_parallelism {
                daemon_config.classification_parallelism = n;
            }
            if let Some(n) = adaptation_parallelism {
                daemon_config.adaptation_parallelism = n;
            }
            if let Some(pause) = pause {
                daemon_config.pause_secs = pause;
            }
            let mut cfg = cfg;
            cfg.daemon = daemon_config;
            config::validate(&cfg)?;

            let options = DaemonOptions::from_config(&cfg.daemon);
            daemon::run_submission_daemon(&cfg, options).await?;
        }
    }

    Ok(())
}
