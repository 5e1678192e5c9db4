use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::Parser;
use prettytable::{Cell, Row as PrettyRow, Table};

use evo_flywheel::config::Settings;
use evo_flywheel::db::Database;
use evo_flywheel::llm::LlmClient;
use evo_flywheel::logging::configure_logging;
use evo_flywheel::report::ReportSynthesizer;

#[derive(Parser)]
#[clap(name = "synthesize_report", about = "Rebuild the daily report for one date")]
struct Cli {
    /// Report date (YYYY-MM-DD); defaults to today (UTC)
    #[clap(short, long)]
    date: Option<NaiveDate>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::global();
    configure_logging(&settings.log_level);

    let db = Database::new(&settings.database_url)
        .await
        .context("Failed to open database")?;
    let llm = LlmClient::from_settings(settings).context("Failed to configure LLM client")?;
    let synthesizer = ReportSynthesizer::new(db.clone(), llm);

    let date = cli.date.unwrap_or_else(|| Utc::now().date_naive());
    let report = synthesizer
        .synthesize(date)
        .await
        .with_context(|| format!("Failed to synthesize report for {}", date))?;

    println!(
        "Report {} for {}: {} papers, {} high value{}",
        report.report_id,
        report.report_date,
        report.total_papers,
        report.high_value_papers,
        if report.used_fallback { " (fallback)" } else { "" }
    );

    let mut table = Table::new();
    table.add_row(PrettyRow::new(vec![
        Cell::new("Cluster"),
        Cell::new("Papers"),
        Cell::new("Summary"),
    ]));
    for cluster in db.clusters_for_report(report.report_id).await? {
        table.add_row(PrettyRow::new(vec![
            Cell::new(&cluster.cluster_name),
            Cell::new(&cluster.paper_ids.len().to_string()),
            Cell::new(cluster.cluster_summary.as_deref().unwrap_or("")),
        ]));
    }
    table.printstd();

    Ok(())
}
