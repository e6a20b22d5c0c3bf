//! WebHarvest CLI: fetch a page, then ask for structured data.

mod repl;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tokio::sync::mpsc;

use webharvest::{
    CaptchaHandoff, CaptchaRequest, FormattedResult, HarvestConfig, ProgressReceiver,
    ProgressStage, Reply, SessionSnapshot, WebHarvester,
};

#[derive(Parser)]
#[command(
    name = "webharvest",
    about = "Fetch pages from hostile sites and ask for the data you need",
    version
)]
struct Cli {
    /// JSON config file (default: ~/.webharvest/config.json when present).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Model that answers queries (gpt-*, gemini-*, ollama:<name>).
    #[arg(long, global = true)]
    model: Option<String>,

    /// HTTP proxy for clearnet fetches. Repeat to rotate through several.
    #[arg(long, global = true)]
    proxy: Vec<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a URL, then answer the questions that follow it.
    ///
    /// Examples:
    ///   webharvest run "https://shop.example/list?page=1 1-5" "products and prices as csv"
    ///   webharvest run "https://shop.example/ -captcha" "all reviews in excel" -o reviews.xlsx
    Run {
        /// `"<url> [page-range] [url-pattern] [-captcha]"`, then zero or more questions.
        #[arg(required = true, num_args = 1..)]
        input: Vec<String>,

        /// Write the last answer to this file.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Save the session snapshot (JSON) when done.
        #[arg(long)]
        save_session: Option<PathBuf>,
    },

    /// Launch interactive mode (default).
    Repl {
        /// Restore a saved session snapshot before the first prompt.
        #[arg(long)]
        session: Option<PathBuf>,
    },

    /// Print the effective configuration as JSON.
    Config,

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   webharvest completions bash > ~/.local/share/bash-completion/completions/webharvest
    ///   webharvest completions zsh > ~/.zfunc/_webharvest
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command.as_ref().unwrap_or(&Commands::Repl { session: None }) {
        Commands::Run {
            input,
            output,
            save_session,
        } => {
            let (target, questions) = input
                .split_first()
                .context("expected a URL to fetch")?;
            let config = load_config(&cli)?;
            let mut harvester = build_harvester(config)?;

            let summary = match harvester.process(target).await {
                Reply::Fetched(summary) => summary,
                Reply::Error(e) => anyhow::bail!("{e}"),
                Reply::Extracted(_) => anyhow::bail!("{target:?} is not a URL to fetch"),
            };
            eprintln!("{summary}");

            let mut last = None;
            for q in questions {
                match harvester.process(q).await {
                    Reply::Extracted(result) => {
                        println!("{result}");
                        last = Some(result);
                    }
                    Reply::Error(e) => anyhow::bail!("{q:?}: {e}"),
                    Reply::Fetched(s) => eprintln!("{s}"),
                }
            }

            match (output, &last) {
                (Some(path), Some(result)) => {
                    write_result(result, path)?;
                    eprintln!("Saved {} result to {}", result.kind(), path.display());
                }
                (None, Some(result)) if result.is_binary() => {
                    let path = PathBuf::from(format!("webharvest-result.{}", result.file_extension()));
                    write_result(result, &path)?;
                    eprintln!("Saved {} result to {}", result.kind(), path.display());
                }
                _ => {}
            }

            if let Some(path) = save_session {
                save_snapshot(&harvester.session().snapshot(), path)?;
            }
        }

        Commands::Repl { session } => {
            let config = load_config(&cli)?;
            let mut harvester = build_harvester(config)?;
            if let Some(path) = session {
                harvester.restore_session(load_snapshot(path)?);
            }
            let handle = tokio::runtime::Handle::current();
            tokio::task::block_in_place(|| repl::run(harvester, handle))?;
        }

        Commands::Config => {
            let config = load_config(&cli)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(*shell, &mut cmd, "webharvest", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn default_config_path() -> Option<PathBuf> {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .ok()?;
    let path = PathBuf::from(home).join(".webharvest").join("config.json");
    path.exists().then_some(path)
}

/// Config file, then environment, then command-line flags.
fn load_config(cli: &Cli) -> anyhow::Result<HarvestConfig> {
    let mut config = match cli.config.clone().or_else(default_config_path) {
        Some(path) => HarvestConfig::load(&path)?,
        None => HarvestConfig::default(),
    };
    config.apply_env(|key| std::env::var(key).ok())?;
    if let Some(model) = &cli.model {
        config.extraction.model = model.clone();
    }
    match cli.proxy.as_slice() {
        [] => {}
        [single] => {
            config.proxy = Some(single.clone());
            config.proxy_pool.clear();
        }
        pool => config.proxy_pool = pool.to_vec(),
    }
    config.validate()?;
    Ok(config)
}

/// Harvester with progress lines on stderr and a terminal CAPTCHA prompt.
///
/// Ctrl+C during a CAPTCHA wait abandons that wait only; anywhere else it
/// quits.
fn build_harvester(config: HarvestConfig) -> anyhow::Result<WebHarvester> {
    let (handoff, requests) = CaptchaHandoff::channel(1);
    let interrupts = handoff.clone();
    let harvester = WebHarvester::new(config)?.with_captcha_handoff(handoff);
    tracing::info!("answering queries with {}", harvester.backend_name());

    spawn_progress_printer(harvester.subscribe());
    spawn_captcha_prompt(requests);
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if interrupts.interrupt() {
                eprintln!("  Interrupted: CAPTCHA wait abandoned.");
            } else {
                std::process::exit(130);
            }
        }
    });
    Ok(harvester)
}

fn spawn_progress_printer(mut events: ProgressReceiver) {
    use tokio::sync::broadcast::error::RecvError;

    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let colour = match event.stage {
                        ProgressStage::Warning | ProgressStage::ChallengeDetected => "33",
                        ProgressStage::CaptchaWaiting => "35",
                        ProgressStage::ContentReady | ProgressStage::ExtractionComplete => "32",
                        _ => "90",
                    };
                    eprintln!("  \x1b[{colour}m[{}]\x1b[0m {}", event.stage, event.message);
                }
                Err(RecvError::Lagged(n)) => tracing::debug!("progress printer skipped {n} events"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// Ask the terminal user to solve each CAPTCHA in the visible browser.
fn spawn_captcha_prompt(mut requests: mpsc::Receiver<CaptchaRequest>) {
    tokio::spawn(async move {
        while let Some(request) = requests.recv().await {
            eprintln!();
            eprintln!("  \x1b[35mCAPTCHA\x1b[0m on {}", request.url);
            if let Some(key) = &request.site_key {
                eprintln!("    site key: {key}");
            }
            eprintln!("    Solve it in the browser window, then press Enter.");

            let abandoned = request.abandoned();
            let confirmed =
                tokio::task::spawn_blocking(move || wait_for_enter(|| abandoned.is_cancelled()))
                    .await;
            // Dropping the request reports it as unresolved.
            match confirmed {
                Ok(Ok(true)) => request.resolve(),
                Ok(Ok(false)) => tracing::debug!("stopped waiting on CAPTCHA for {}", request.url),
                Ok(Err(e)) => tracing::warn!("cannot read the terminal: {e}"),
                Err(e) => tracing::warn!("CAPTCHA prompt failed: {e}"),
            }
        }
    });
}

/// Block until Enter is pressed. Input is polled, never read blindly, so
/// nothing is consumed once `stop` holds.
fn wait_for_enter(stop: impl Fn() -> bool) -> std::io::Result<bool> {
    use crossterm::event::{self, Event, KeyCode, KeyEventKind};

    while !stop() {
        if event::poll(Duration::from_millis(200))? {
            if let Event::Key(key) = event::read()? {
                if key.code == KeyCode::Enter && key.kind == KeyEventKind::Press {
                    return Ok(true);
                }
            }
        }
    }
    Ok(false)
}

fn write_result(result: &FormattedResult, path: &Path) -> anyhow::Result<()> {
    std::fs::write(path, result.to_bytes())
        .with_context(|| format!("failed to write {}", path.display()))
}

fn save_snapshot(snapshot: &SessionSnapshot, path: &Path) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(snapshot)?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
}

fn load_snapshot(path: &Path) -> anyhow::Result<SessionSnapshot> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("{} is not a session snapshot", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_takes_target_then_questions() {
        let cli = Cli::parse_from([
            "webharvest",
            "run",
            "https://example.com 1-3 -captcha",
            "titles",
            "prices as csv",
            "--model",
            "ollama:llama3",
            "--proxy",
            "http://a:1",
            "--proxy",
            "http://b:2",
        ]);
        assert_eq!(cli.model.as_deref(), Some("ollama:llama3"));
        assert_eq!(cli.proxy, vec!["http://a:1", "http://b:2"]);
        match cli.command {
            Some(Commands::Run { input, output, .. }) => {
                assert_eq!(
                    input,
                    vec!["https://example.com 1-3 -captcha", "titles", "prices as csv"]
                );
                assert!(output.is_none());
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_abandoned_prompt_reads_nothing() {
        assert!(!wait_for_enter(|| true).unwrap());
    }

    #[test]
    fn test_snapshot_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let mut session = webharvest::Session::new(4);
        session.replace("https://example.com", "<p>hi</p>", "hi");

        save_snapshot(&session.snapshot(), &path).unwrap();
        assert_eq!(load_snapshot(&path).unwrap(), session.snapshot());
    }
}
