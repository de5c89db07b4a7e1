use anyhow::Result;
use rusqlite::Connection;
use std::env;
use std::path::Path;
use tracing_subscriber::EnvFilter;

use listing_registry::{
    count_diffs_for_job, create_import_job, generate_import_diffs, generate_properties,
    generate_transactions, import_batch, load_csv, run_batch, setup_database, NoopGrader,
    PipelineConfig, Source,
};

const DEFAULT_DB_PATH: &str = "listings.db";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("import") if args.len() >= 4 => run_import(&args[2], &args[3], db_path(&args, 4)),
        Some("diff") if args.len() >= 3 => run_diff(&args[2], db_path(&args, 3)),
        Some("reconcile") if args.len() >= 3 => run_reconcile(&args[2], db_path(&args, 3)),
        Some("run") if args.len() >= 4 => run_pipeline(&args[2], &args[3], db_path(&args, 4)),
        _ => {
            print_usage();
            std::process::exit(1);
        }
    }
}

fn db_path<'a>(args: &'a [String], index: usize) -> &'a str {
    args.get(index).map(String::as_str).unwrap_or(DEFAULT_DB_PATH)
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  listing-registry import <source> <csv> [db]    ingest a batch");
    eprintln!("  listing-registry diff <job_id> [db]            diff a batch against its predecessor");
    eprintln!("  listing-registry reconcile <job_id> [db]       reconcile properties and transactions");
    eprintln!("  listing-registry run <source> <csv> [db]       ingest + diff + reconcile");
    eprintln!();
    eprintln!("Sources: zillow, climbsf_rented");
}

fn open_database(path: &str) -> Result<Connection> {
    let conn = Connection::open(Path::new(path))?;
    setup_database(&conn)?;
    Ok(conn)
}

fn run_import(source: &str, csv: &str, db: &str) -> Result<()> {
    let source = Source::parse(source)?;
    let conn = open_database(db)?;
    let config = PipelineConfig::default();

    let rows = load_csv(Path::new(csv))?;
    println!("Loaded {} rows from {}", rows.len(), csv);

    let job_id = create_import_job(&conn, source)?;
    let stats = import_batch(&conn, job_id, &rows, &config)?;
    println!(
        "Job {}: inserted {} listings, discarded {} rows",
        job_id, stats.inserted, stats.discarded
    );

    Ok(())
}

fn run_diff(job_id: &str, db: &str) -> Result<()> {
    let job_id: i64 = job_id.parse()?;
    let conn = open_database(db)?;

    let summary = generate_import_diffs(&conn, job_id)?;
    println!(
        "Job {}: added {}, modified {}, removed {} ({} diff entries)",
        job_id,
        summary.added_rows,
        summary.modified_rows,
        summary.removed_rows,
        count_diffs_for_job(&conn, job_id)?
    );

    Ok(())
}

fn run_reconcile(job_id: &str, db: &str) -> Result<()> {
    let job_id: i64 = job_id.parse()?;
    let conn = open_database(db)?;
    let config = PipelineConfig::default();

    let properties = generate_properties(&conn, job_id, &NoopGrader)?;
    let transactions = generate_transactions(&conn, job_id, &config)?;
    println!(
        "Job {}: reconciled {} properties, {} transactions",
        job_id, properties, transactions
    );

    Ok(())
}

fn run_pipeline(source: &str, csv: &str, db: &str) -> Result<()> {
    let source = Source::parse(source)?;
    let conn = open_database(db)?;
    let config = PipelineConfig::default();

    let rows = load_csv(Path::new(csv))?;
    println!("Loaded {} rows from {}", rows.len(), csv);

    let job_id = create_import_job(&conn, source)?;
    let stats = import_batch(&conn, job_id, &rows, &config)?;
    println!(
        "Job {}: inserted {} listings, discarded {} rows",
        job_id, stats.inserted, stats.discarded
    );

    let report = run_batch(&conn, job_id, &config, &NoopGrader)?;
    println!(
        "Job {}: added {}, modified {}, removed {}",
        job_id,
        report.diff_summary.added_rows,
        report.diff_summary.modified_rows,
        report.diff_summary.removed_rows
    );
    println!(
        "Reconciled {} properties, {} transactions",
        report.properties_processed, report.transactions_processed
    );

    Ok(())
}
