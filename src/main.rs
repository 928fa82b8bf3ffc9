use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::info;

use form_assistant::answers::AnswerStore;
use form_assistant::chat::{self, ShellExit, WorkerOptions};
use form_assistant::constants;
use form_assistant::openai::OpenAiClient;
use form_assistant::runner::TurnRunner;
use form_assistant::session::{ConversationSession, SessionSettings};
use form_assistant::telemetry::TracingReporter;

// Define the command-line interface structure using clap
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Interview the user about a form and save the answers.
    Fill {
        #[arg(help = "PDF or image of the form. Prompted for when omitted.")]
        form: Option<PathBuf>,
        #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true, help = "API key for the assistant service.")]
        api_key: String,
        #[arg(long, env = "OPENAI_BASE_URL", default_value_t = constants::OPENAI_BASE_URL.clone(), help = "Base URL of the assistant service.")]
        base_url: String,
        #[arg(long, env = "FORM_ASSISTANT_MODEL", default_value_t = constants::ASSISTANT_MODEL.clone(), help = "Model the assistant runs on.")]
        model: String,
        #[arg(long, default_value_t = constants::OUTPUT_PATH.clone(), help = "Where the filled answers are written.")]
        output: String,
        #[arg(long, default_value_t = constants::DEFAULT_POLL_INTERVAL_MS, help = "Delay between run status polls, in milliseconds.")]
        poll_interval_ms: u64,
        #[arg(long, help = "Abandon a run after this many seconds. Waits indefinitely when omitted.")]
        run_timeout_secs: Option<u64>,
        #[arg(long, default_value_t = constants::DEFAULT_REQUEST_TIMEOUT_SECS, help = "Fail any single request to the assistant service after this many seconds.")]
        request_timeout_secs: u64,
        #[arg(long, help = "Keep the remote assistant and uploaded form after the session.")]
        keep_assistant: bool,
    },
    /// Print a saved result.
    Show {
        #[arg(default_value_t = constants::OUTPUT_PATH.clone())]
        path: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for OPENAI_API_KEY and friends)
    dotenvy::dotenv().ok();

    // Logs go to stderr so the conversation on stdout stays readable.
    // Reads log level from RUST_LOG (e.g., RUST_LOG=form_assistant=debug)
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Fill {
            form,
            api_key,
            base_url,
            model,
            output,
            poll_interval_ms,
            run_timeout_secs,
            request_timeout_secs,
            keep_assistant,
        } => {
            info!(%model, %output, "Starting form session");
            let client = OpenAiClient::with_request_timeout(
                api_key,
                base_url,
                Duration::from_secs(request_timeout_secs),
            )
            .context("Failed to build the assistant service client")?;
            let service = Arc::new(client);
            let settings = SessionSettings {
                model,
                output_path: PathBuf::from(output),
                runner: TurnRunner::new(
                    Duration::from_millis(poll_interval_ms),
                    run_timeout_secs.map(Duration::from_secs),
                ),
            };
            let session = ConversationSession::new(service, settings);
            let cancel = CancellationToken::new();
            let worker = chat::spawn_worker(
                session,
                Arc::new(TracingReporter),
                WorkerOptions {
                    instructions: constants::FORM_INSTRUCTIONS.to_string(),
                    keep_assistant,
                },
                cancel.clone(),
            );

            let stdin = BufReader::new(tokio::io::stdin());
            let mut stdout = std::io::stdout();
            let exit = chat::run_shell(stdin, &mut stdout, worker, form, cancel)
                .await
                .context("Chat session failed")?;
            info!(?exit, "Form session finished");
            match exit {
                ShellExit::Failed => bail!("The form was not completed"),
                ShellExit::Cancelled => bail!("Cancelled before the form was completed"),
                ShellExit::Completed(_) | ShellExit::NoFileSelected => {}
            }
        }
        Commands::Show { path } => {
            let store = AnswerStore::load(PathBuf::from(&path).as_path())
                .with_context(|| format!("Failed to read {}", path))?;
            if store.is_empty() {
                println!("{} holds no answers.", path);
            }
            for (question, answer) in store.iter() {
                println!("{}\n  {}", question, answer);
            }
        }
    }

    Ok(())
}
