use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use gitty::inference::CommandInference;
use gitty::voice::{AudioSource, CpalSource, MicOwner, Microphone, calculate_energy};
use gitty::{CommandInferenceClient, Config, Daemon, RepositoryProbe};

/// Gitty - talk to git
#[derive(Parser)]
#[command(name = "gitty", version, about)]
struct Cli {
    /// Repository directory (defaults to the current directory)
    #[arg(long, global = true, env = "GITTY_CWD")]
    cwd: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Explain each proposed subcommand
    #[arg(long, global = true)]
    learning: bool,

    /// Never arm the wake word detector; Enter triggers capture
    #[arg(long, env = "GITTY_NO_WAKE_WORD")]
    no_wake_word: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print the repository snapshot as JSON
    Snapshot,
    /// Infer a command for an utterance without running it
    Infer {
        /// What you would have said
        utterance: String,
    },
    /// Run a single manually triggered cycle
    Listen,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,gitty=info",
        1 => "info,gitty=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load();
    if cli.learning {
        config.session.learning_mode = true;
    }
    tracing::debug!(?config, "loaded configuration");

    match cli.command {
        Some(Command::Snapshot) => snapshot(cli.cwd).await,
        Some(Command::Infer { utterance }) => infer(&config, cli.cwd, &utterance).await,
        Some(Command::Listen) => {
            Daemon::new(config, cli.cwd).listen_once().await?;
            Ok(())
        }
        Some(Command::TestMic { duration }) => test_mic(duration).await,
        None => {
            tracing::info!(
                cwd = ?cli.cwd,
                wake_word = !cli.no_wake_word,
                "starting gitty"
            );
            Daemon::new(config, cli.cwd).run(!cli.no_wake_word).await?;
            Ok(())
        }
    }
}

async fn snapshot(cwd: Option<PathBuf>) -> anyhow::Result<()> {
    let snapshot = RepositoryProbe::system().snapshot(cwd.as_deref()).await;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

async fn infer(config: &Config, cwd: Option<PathBuf>, utterance: &str) -> anyhow::Result<()> {
    let snapshot = RepositoryProbe::system().snapshot(cwd.as_deref()).await;
    if !snapshot.in_repo {
        anyhow::bail!("not a git repository");
    }
    let client = CommandInferenceClient::new(&config.llm)?;
    let proposal = client
        .infer(utterance, &snapshot, &[], config.session.learning_mode)
        .await?;
    println!("{}", serde_json::to_string_pretty(&proposal)?);
    Ok(())
}

async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let microphone = Microphone::new();
    let lease = microphone.acquire(MicOwner::Diagnostics)?;
    let mut stream = CpalSource::new().open(lease)?;
    println!("---");

    for i in 0..duration {
        let mut samples = Vec::new();
        let window = tokio::time::sleep(Duration::from_secs(1));
        tokio::pin!(window);
        loop {
            tokio::select! {
                () = &mut window => break,
                frame = stream.next_frame() => match frame {
                    Some(frame) => samples.extend(frame),
                    None => anyhow::bail!("microphone stream ended"),
                },
            }
        }

        let energy = calculate_energy(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    drop(stream);

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check your input device and its permissions.");

    Ok(())
}
