//! Interactive mode.
//!
//! Type a URL (with an optional page range, URL pattern and `-captcha`) to
//! fetch it, then ask questions about the page. Lines starting with `/` are
//! REPL commands; `/help` lists them.

use std::path::Path;

use rustyline::completion::{Completer, Pair};
use rustyline::config::CompletionType;
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{
    Cmd, ConditionalEventHandler, Config, Editor, Event, EventContext, EventHandler, Helper,
    KeyEvent, RepeatCount,
};
use tokio::runtime::Handle;

use webharvest::{FormattedResult, Reply, WebHarvester};

/// Available REPL commands.
const COMMANDS: &[(&str, &str)] = &[
    ("/session", "Show what the current session holds"),
    ("/save", "Write the last answer to a file"),
    ("/export", "Save the session snapshot as JSON"),
    ("/load", "Restore a session snapshot"),
    ("/clear", "Clear the screen"),
    ("/help", "Show available commands"),
    ("/exit", "Quit the REPL"),
];

struct HarvestHelper;

impl Completer for HarvestHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let input = &line[..pos];

        if input.starts_with('/') && !input.contains(' ') {
            let matches: Vec<Pair> = COMMANDS
                .iter()
                .filter(|(cmd, _)| cmd.starts_with(input))
                .map(|(cmd, desc)| Pair {
                    display: format!("{cmd:<16} {desc}"),
                    replacement: format!("{cmd} "),
                })
                .collect();
            return Ok((0, matches));
        }

        // Snapshot files for /load.
        if let Some(args) = input.strip_prefix("/load ") {
            let mut files: Vec<String> = std::fs::read_dir(".")
                .map(|entries| {
                    entries
                        .flatten()
                        .map(|e| e.path())
                        .filter(|p| p.extension().is_some_and(|e| e == "json"))
                        .filter_map(|p| p.file_name()?.to_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            files.sort();
            let matches = files
                .into_iter()
                .filter(|f| f.starts_with(args.trim()))
                .map(|f| Pair {
                    display: f.clone(),
                    replacement: format!("{f} "),
                })
                .collect();
            return Ok((input.len() - args.len(), matches));
        }

        Ok((pos, Vec::new()))
    }
}

impl Hinter for HarvestHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &rustyline::Context<'_>) -> Option<String> {
        if pos < line.len() || !line.starts_with('/') || line.contains(' ') {
            return None;
        }
        COMMANDS
            .iter()
            .find(|(cmd, _)| cmd.starts_with(line) && *cmd != line)
            .map(|(cmd, _)| cmd[line.len()..].to_string())
    }
}

impl Highlighter for HarvestHelper {}
impl Validator for HarvestHelper {}
impl Helper for HarvestHelper {}

struct TabCompleteOrAcceptHint;

impl ConditionalEventHandler for TabCompleteOrAcceptHint {
    fn handle(
        &self,
        _evt: &Event,
        _n: RepeatCount,
        _positive: bool,
        ctx: &EventContext<'_>,
    ) -> Option<Cmd> {
        if ctx.has_hint() {
            Some(Cmd::CompleteHint)
        } else {
            Some(Cmd::Complete)
        }
    }
}

struct ReplState {
    harvester: WebHarvester,
    last_result: Option<FormattedResult>,
}

/// Run the interactive loop. Harvester calls are driven on `handle`.
pub fn run(harvester: WebHarvester, handle: Handle) -> anyhow::Result<()> {
    eprintln!();
    eprintln!(
        "  \x1b[32m\u{25c9}\x1b[0m \x1b[1mwebharvest v{}\x1b[0m \x1b[90m(answering with {})\x1b[0m",
        env!("CARGO_PKG_VERSION"),
        harvester.backend_name()
    );
    eprintln!();
    eprintln!("    Paste a URL to fetch it, then ask what you want to know.");
    eprintln!(
        "    \x1b[36m/help\x1b[0m for commands, \x1b[90mTab\x1b[0m to complete, \x1b[90m/exit\x1b[0m to quit."
    );
    eprintln!();

    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .completion_type(CompletionType::List)
        .completion_prompt_limit(20)
        .build();

    let mut rl: Editor<HarvestHelper, rustyline::history::DefaultHistory> =
        Editor::with_config(config)?;
    rl.set_helper(Some(HarvestHelper));
    rl.bind_sequence(
        KeyEvent::from('\t'),
        EventHandler::Conditional(Box::new(TabCompleteOrAcceptHint)),
    );

    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    let hist_path = std::path::PathBuf::from(&home).join(".webharvest_history");
    if hist_path.exists() {
        let _ = rl.load_history(&hist_path);
    }

    let mut state = ReplState {
        harvester,
        last_result: None,
    };
    let prompt = " \x1b[36mharvest>\x1b[0m ";

    loop {
        match rl.readline(prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let Some(command) = line.strip_prefix('/') else {
                    harvest(line, &mut state, &handle);
                    continue;
                };

                let mut parts = command.splitn(2, ' ');
                let cmd = parts.next().unwrap_or("");
                let args = parts.next().unwrap_or("").trim();

                match cmd {
                    "exit" | "quit" => {
                        eprintln!("  Goodbye!");
                        break;
                    }
                    "" | "help" | "h" | "?" => cmd_help(),
                    "clear" | "cls" => eprint!("\x1b[2J\x1b[H"),
                    "session" => cmd_session(&state),
                    "save" => cmd_save(args, &state),
                    "export" => cmd_export(args, &state),
                    "load" => cmd_load(args, &mut state),
                    _ => {
                        eprintln!("  Unknown command '/{cmd}'. Type /help for commands.");
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                eprintln!("  \x1b[90m(Ctrl+C)\x1b[0m Type \x1b[1m/exit\x1b[0m to quit.");
            }
            Err(ReadlineError::Eof) => {
                eprintln!("  Goodbye!");
                break;
            }
            Err(err) => {
                eprintln!("  Error: {err}");
                break;
            }
        }
    }

    let _ = rl.save_history(&hist_path);

    Ok(())
}

/// A fetch command or a question.
fn harvest(line: &str, state: &mut ReplState, handle: &Handle) {
    match handle.block_on(state.harvester.process(line)) {
        Reply::Extracted(result) => {
            println!("{result}");
            if result.is_binary() {
                eprintln!(
                    "  Binary result kept; write it with /save <file>.{}",
                    result.file_extension()
                );
            }
            state.last_result = Some(result);
        }
        reply @ Reply::Fetched(_) => eprintln!("  {reply}"),
        reply @ Reply::Error(_) => eprintln!("  \x1b[31m{reply}\x1b[0m"),
    }
}

fn cmd_help() {
    eprintln!();
    eprintln!("  Input:");
    eprintln!();
    eprintln!("    <url> [pages] [pattern] [-captcha]   Fetch a page (e.g. https://site/list?page=1 1-5)");
    eprintln!("    <question>                           Ask about the fetched content");
    eprintln!();
    eprintln!("  Commands:");
    eprintln!();
    for (cmd, desc) in COMMANDS {
        eprintln!("    {cmd:<18} {desc}");
    }
    eprintln!();
    eprintln!("  Tip: mention json, csv, excel, sql or html in a question to pick the format.");
    eprintln!();
}

fn cmd_session(state: &ReplState) {
    let session = state.harvester.session();
    eprintln!();
    match session.current_url() {
        Some(url) => {
            eprintln!("  URL:         {url}");
            if let Some(egress) = session.egress() {
                eprintln!("  Route:       {}", egress.label());
            }
            if let Some(at) = session.fetched_at() {
                eprintln!("  Fetched at:  {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
            }
            eprintln!(
                "  Content:     {} characters",
                session.normalized_content().map(str::len).unwrap_or(0)
            );
            if let Some(fp) = session.content_fingerprint() {
                eprintln!("  Fingerprint: {}", &fp[..fp.len().min(16)]);
            }
            eprintln!("  Cached:      {} answer(s)", session.cache().len());
        }
        None => eprintln!("  Nothing fetched yet."),
    }
    eprintln!();
}

fn cmd_save(args: &str, state: &ReplState) {
    let Some(result) = &state.last_result else {
        eprintln!("  No answer to save yet.");
        return;
    };
    let path = if args.is_empty() {
        format!("webharvest-result.{}", result.file_extension())
    } else {
        args.to_string()
    };
    match crate::write_result(result, Path::new(&path)) {
        Ok(()) => eprintln!("  Saved {} result to {path}", result.kind()),
        Err(e) => eprintln!("  Failed to save: {e:#}"),
    }
}

fn cmd_export(args: &str, state: &ReplState) {
    if args.is_empty() {
        eprintln!("  Usage: /export <file.json>");
        return;
    }
    let snapshot = state.harvester.session().snapshot();
    match crate::save_snapshot(&snapshot, Path::new(args)) {
        Ok(()) => eprintln!("  Session saved to {args}"),
        Err(e) => eprintln!("  Failed to export: {e:#}"),
    }
}

fn cmd_load(args: &str, state: &mut ReplState) {
    if args.is_empty() {
        eprintln!("  Usage: /load <file.json>");
        return;
    }
    match crate::load_snapshot(Path::new(args)) {
        Ok(snapshot) => {
            let url = snapshot.current_url.clone().unwrap_or_else(|| "nothing".into());
            state.harvester.restore_session(snapshot);
            state.last_result = None;
            eprintln!("  Restored session for {url}");
        }
        Err(e) => eprintln!("  Failed to load: {e:#}"),
    }
}
