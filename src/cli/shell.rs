use std::io::Write;
use std::sync::{Mutex, MutexGuard, PoisonError};

use colored::Colorize;
use futures::future::{FutureExt, LocalBoxFuture};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::aggregate::Aggregates;
use crate::cli::predict::{client_for, settle_and_print};
use crate::cli::stats::format_aggregates;
use crate::cli::{format_report, format_rows, ingest, no_match};
use crate::error::{Result, TxError};
use crate::scoring::{HttpScoringClient, ScoringClient};
use crate::session::{PredictionState, Session};
use crate::settings::{load_settings, Settings};

const HELP: &str = "\
Commands:
  load <path>   index a transaction file (replaces the current one)
  find <id>     look up every row for an id
  rows          show the current rows and their predictions
  stats         summarize the current rows
  predict       request a prediction for each current row (runs in the
                background; a new find or load discards its results)
  ids [n]       list the first n ids (default 20)
  status        show what is loaded
  help          this text
  quit          leave";

/// Parsed shell input.
#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Load(&'a str),
    Find(&'a str),
    Rows,
    Stats,
    Predict,
    Ids(usize),
    Status,
    Help,
    Quit,
    Empty,
    Unknown(&'a str),
}

fn parse_command(line: &str) -> Command<'_> {
    let line = line.trim();
    let (word, arg) = match line.split_once(char::is_whitespace) {
        Some((w, a)) => (w, a.trim()),
        None => (line, ""),
    };
    match word {
        "" => Command::Empty,
        "load" | "open" if !arg.is_empty() => Command::Load(arg),
        "find" | "lookup" | "search" => Command::Find(arg),
        "rows" | "records" => Command::Rows,
        "stats" | "graphs" => Command::Stats,
        "predict" => Command::Predict,
        "ids" => Command::Ids(arg.parse().unwrap_or(20)),
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        _ => Command::Unknown(line),
    }
}

struct Shell {
    session: Mutex<Session>,
    settings: Settings,
    client: HttpScoringClient,
}

impl Shell {
    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load(&self, path: &str) -> Result<()> {
        let (index, report) = ingest(path, &self.settings)?;
        println!("{}", format_report(&report));
        self.session().load(index, report);
        Ok(())
    }

    fn find(&self, id: &str) -> Result<()> {
        let mut session = self.session();
        if session.index().is_none() {
            return Err(TxError::NoFileLoaded);
        }
        let found = session.lookup(id).len();
        if found == 0 {
            println!("{}", no_match(id));
        } else {
            println!("{found} records for id {id}");
        }
        Ok(())
    }

    fn rows(&self) {
        let session = self.session();
        if session.matches().is_empty() {
            println!("No current records. Use `find <id>`.");
            return;
        }
        let header = session.report().map(|r| r.header.as_slice()).unwrap_or_default();
        let predictions = (!session.predictions().is_empty()).then(|| session.predictions());
        println!("{}", format_rows(header, session.matches(), predictions));
    }

    fn stats(&self) {
        let session = self.session();
        if session.matches().is_empty() {
            println!("No current records. Use `find <id>`.");
            return;
        }
        println!("{}", format_aggregates(&Aggregates::compute(session.matches())));
    }

    fn ids(&self, limit: usize) -> Result<()> {
        let session = self.session();
        let index = session.index().ok_or(TxError::NoFileLoaded)?;
        if index.is_empty() {
            println!("No ids indexed.");
            return Ok(());
        }
        let keys = index.keys();
        for key in keys.iter().take(limit) {
            println!("{key:>12}  {} rows", index.get(key).len());
        }
        if keys.len() > limit {
            println!("... {} more", keys.len() - limit);
        }
        Ok(())
    }

    fn status(&self) {
        let session = self.session();
        match session.report() {
            Some(report) => println!("{}", format_report(report)),
            None => println!("No file loaded."),
        }
        if let Some(index) = session.index() {
            println!("Indexed rows: {}", index.row_count());
        }
        if let Some(key) = session.key() {
            println!("Current id:   {key} ({} rows)", session.matches().len());
        }
        let state = match session.state() {
            PredictionState::Idle => "idle".to_string(),
            PredictionState::Predicting { generation } => format!("predicting (batch {generation})"),
            PredictionState::Committed => {
                format!("{} predictions", session.predictions().len())
            }
            PredictionState::PartiallyCommitted { failed } => format!(
                "{} predictions, {failed} failed",
                session.predictions().len()
            ),
        };
        println!("Predictions:  {state} (generation {})", session.generation());
        println!("Endpoint:     {}", self.client.endpoint());
    }
}

/// Either the next input line or the pending batch settling.
enum Wake {
    Line(Option<String>),
    BatchSettled,
}

/// Resolves when the pending batch settles; never resolves without one.
async fn settle_pending(batch: &mut Option<LocalBoxFuture<'_, ()>>) {
    match batch {
        Some(pending) => pending.await,
        None => std::future::pending().await,
    }
}

pub async fn run(file: Option<&str>, endpoint: Option<&str>) -> Result<()> {
    let settings = load_settings();
    let client = client_for(&settings, endpoint)?;
    let shell = Shell {
        session: Mutex::new(Session::new()),
        settings,
        client,
    };
    if let Some(file) = file {
        shell.load(file)?;
    }
    println!("Type `help` for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    // At most one batch runs; input keeps being read while it is in flight.
    let mut batch: Option<LocalBoxFuture<'_, ()>> = None;
    loop {
        print!("{} ", "txlens>".cyan());
        std::io::stdout().flush()?;

        let wake = tokio::select! {
            biased;
            line = lines.next_line() => Wake::Line(line?),
            () = settle_pending(&mut batch) => Wake::BatchSettled,
        };
        let line = match wake {
            Wake::BatchSettled => {
                batch = None;
                continue;
            }
            Wake::Line(Some(line)) => line,
            Wake::Line(None) => {
                // End of input still lets the last batch report.
                if let Some(pending) = batch.take() {
                    pending.await;
                }
                break;
            }
        };

        let result = match parse_command(&line) {
            Command::Empty => Ok(()),
            Command::Quit => break,
            Command::Help => {
                println!("{HELP}");
                Ok(())
            }
            Command::Load(path) => shell.load(path),
            Command::Find(id) => shell.find(id),
            Command::Rows => {
                shell.rows();
                Ok(())
            }
            Command::Stats => {
                shell.stats();
                Ok(())
            }
            Command::Predict => {
                // The batch starts now so later lookups in the same input
                // already see it as in flight.
                let ticket = shell.session().begin_batch();
                match ticket {
                    Some(ticket) => {
                        if batch.is_some() {
                            println!("{}", "Previous batch superseded.".yellow());
                        }
                        println!("Predicting {} records in the background.", ticket.rows.len());
                        batch = Some(
                            settle_and_print(&shell.session, &shell.client, &shell.settings, ticket)
                                .boxed_local(),
                        );
                    }
                    None => println!("Nothing to predict."),
                }
                Ok(())
            }
            Command::Ids(limit) => shell.ids(limit),
            Command::Status => {
                shell.status();
                Ok(())
            }
            Command::Unknown(input) => {
                println!("Unknown command: {input}. Type `help`.");
                Ok(())
            }
        };
        // A bad command never ends the session.
        if let Err(e) = result {
            eprintln!("{} {e}", "Error:".red());
        }
    }
    Ok(())
}
