use std::sync::{Mutex, PoisonError};

use colored::Colorize;

use crate::cli::{format_report, format_rows, ingest, no_match};
use crate::dispatch::{self, BatchOutcome};
use crate::error::Result;
use crate::scoring::HttpScoringClient;
use crate::session::{BatchTicket, BatchVerdict, Session};
use crate::settings::{load_settings, Settings};

pub async fn run(file: &str, id: &str, endpoint: Option<&str>) -> Result<()> {
    let settings = load_settings();
    let (index, report) = ingest(file, &settings)?;
    println!("{}", format_report(&report));

    let mut session = Session::new();
    session.load(index, report);
    if session.lookup(id).is_empty() {
        println!("{}", no_match(id));
        return Ok(());
    }

    let session = Mutex::new(session);
    let client = client_for(&settings, endpoint)?;
    predict_and_print(&session, &client, &settings).await;
    Ok(())
}

pub(crate) fn client_for(settings: &Settings, endpoint: Option<&str>) -> Result<HttpScoringClient> {
    let endpoint = settings.resolve_endpoint(endpoint);
    HttpScoringClient::new(&endpoint, settings.timeout())
}

/// Run one batch over the session's match set and print the outcome.
pub(crate) async fn predict_and_print(
    session: &Mutex<Session>,
    client: &HttpScoringClient,
    settings: &Settings,
) {
    match dispatch::predict(session, client, settings.max_in_flight).await {
        Some((verdict, outcome)) => print_settled(session, verdict, &outcome),
        None => println!("Nothing to predict."),
    }
}

/// Dispatch an already started batch and print what it settled to.
pub(crate) async fn settle_and_print(
    session: &Mutex<Session>,
    client: &HttpScoringClient,
    settings: &Settings,
    ticket: BatchTicket,
) {
    let (verdict, outcome) =
        dispatch::run_batch(session, client, ticket, settings.max_in_flight).await;
    print_settled(session, verdict, &outcome);
}

fn print_settled(session: &Mutex<Session>, verdict: BatchVerdict, outcome: &BatchOutcome) {
    if verdict == BatchVerdict::Discarded {
        println!("{}", "Lookup changed while predicting; results discarded.".yellow());
        return;
    }
    let session = session.lock().unwrap_or_else(PoisonError::into_inner);
    let header = session.report().map(|r| r.header.as_slice()).unwrap_or_default();
    println!(
        "{}",
        format_rows(header, session.matches(), Some(session.predictions()))
    );
    println!("{}", format_summary(outcome));
}

pub(crate) fn format_summary(outcome: &BatchOutcome) -> String {
    let scored = outcome.scores.len();
    let line = format!("Got {scored} of {} predictions", outcome.dispatched);
    let mut out = if scored == outcome.dispatched {
        line.green().to_string()
    } else {
        line.yellow().to_string()
    };
    for (pos, err) in &outcome.failures {
        out.push_str(&format!("\n  record {}: {err}", pos + 1));
    }
    out
}
