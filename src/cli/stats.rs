use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::aggregate::Aggregates;
use crate::cli::{format_report, ingest, no_match};
use crate::error::Result;
use crate::fmt::{money, percent};
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
    println!("{}", format_aggregates(&Aggregates::compute(rows)));
    Ok(())
}

pub(crate) fn format_aggregates(agg: &Aggregates) -> String {
    let mut out = String::new();

    out.push_str(&format!(
        "{} {}   Fisica: {}   Digital: {}\n",
        "Total amount:".bold(),
        money(agg.total_amount).green().bold(),
        agg.sale_type_count("fisica"),
        agg.sale_type_count("digital"),
    ));
    if agg.unparsed_amounts > 0 {
        out.push_str(&format!(
            "{}\n",
            format!("{} rows with an unreadable amount left out of totals", agg.unparsed_amounts)
                .yellow()
        ));
    }

    let mut sale_types = Table::new();
    sale_types.set_header(vec!["Sale type", "Count", "Share"]);
    let categorized = agg.categorized();
    for c in &agg.category_counts {
        sale_types.add_row(vec![
            Cell::new(&c.label),
            Cell::new(c.count),
            Cell::new(percent(c.share(categorized))),
        ]);
    }
    out.push_str(&format!("\n{}\n{sale_types}\n", "Sale types".bold()));

    let mut merchants = Table::new();
    merchants.set_header(vec!["Merchant", "Transactions", "Amount"]);
    for m in &agg.merchants {
        merchants.add_row(vec![
            Cell::new(&m.merchant),
            Cell::new(m.count),
            Cell::new(money(m.amount)),
        ]);
    }
    out.push_str(&format!("\n{}\n{merchants}\n", "Merchants".bold()));

    let mut series = Table::new();
    series.set_header(vec!["Date", "Amount"]);
    for p in &agg.time_series {
        series.add_row(vec![Cell::new(&p.date), Cell::new(money(p.amount))]);
    }
    out.push_str(&format!("\n{}\n{series}", "Amount over time".bold()));
    if agg.unparsed_dates > 0 {
        out.push_str(&format!(
            "\n{}",
            format!("{} rows without a readable date or amount not plotted", agg.unparsed_dates)
                .dimmed()
        ));
    }
    out
}
