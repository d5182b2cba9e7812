use crate::cli::{format_report, format_rows, ingest, no_match};
use crate::error::Result;
use crate::settings::load_settings;

pub fn run(file: &str, id: &str) -> Result<()> {
    let settings = load_settings();
    let (index, report) = ingest(file, &settings)?;
    println!("{}", format_report(&report));

    let rows = index.get(id);
    if rows.is_empty() {
        println!("{}", no_match(id));
        return Ok(());
    }
    println!("{} records for id {id}", rows.len());
    println!("{}", format_rows(&report.header, rows, None));
    Ok(())
}
