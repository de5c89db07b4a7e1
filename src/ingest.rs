// Batch ingestion - CSV rows to immutable listing snapshots
//
// Rows come in as loosely-typed strings straight off the scrapers. The
// shared base builder coerces and filters them; each source variant wraps
// the base builder with its own adjustments (see sources.rs).

use anyhow::{Context, Result};
use csv::Reader;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::PipelineConfig;
use crate::db::{self, ListingRecord};
use crate::formatter;
use crate::sources::{rules_for, SourceRules};

// ============================================================================
// RAW ROW
// ============================================================================

/// One unparsed listing row as scraped. Every field is optional text;
/// coercion happens in the base builder, not here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawListingRow {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub neighborhood: Option<String>,
    #[serde(default)]
    pub bedrooms: Option<String>,
    #[serde(default)]
    pub bathrooms: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub sqft: Option<String>,
    #[serde(default)]
    pub garage: Option<String>,
    #[serde(default)]
    pub year_built: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub date_listed: Option<String>,
    #[serde(default)]
    pub date_closed: Option<String>,
    #[serde(default)]
    pub origin_url: Option<String>,
    #[serde(default)]
    pub transaction_type: Option<String>,
}

// ============================================================================
// DISCARD RULES
// ============================================================================

/// Shared row filter applied by the base builder. Returns the reason a row
/// is unusable, or None when it should be kept.
pub fn discard_reason(row: &RawListingRow) -> Option<&'static str> {
    let address = row.address.as_deref().unwrap_or("");

    if formatter::to_float(row.sqft.as_deref().unwrap_or("")) == 0.0 {
        Some("sqft is 0")
    } else if formatter::to_float(row.price.as_deref().unwrap_or("")) == 0.0 {
        Some("price is 0")
    } else if address.contains("Undisclosed Address") {
        Some("address is undisclosed")
    } else if !address.starts_with(|c: char| c.is_ascii_digit()) {
        Some("address has no street number")
    } else {
        None
    }
}

// ============================================================================
// BASE BUILDER
// ============================================================================

/// Shared snapshot construction. Source variants call this first and then
/// apply their adjustments on the result; the variant never reimplements
/// coercion or the discard rules.
pub fn base_listing<R: SourceRules + ?Sized>(
    row: &RawListingRow,
    rules: &R,
    job_id: i64,
    config: &PipelineConfig,
) -> Option<ListingRecord> {
    if let Some(reason) = discard_reason(row) {
        tracing::debug!(
            origin_url = row.origin_url.as_deref().unwrap_or(""),
            reason,
            "row discarded"
        );
        return None;
    }

    let date_closed = row.date_closed.as_deref().and_then(formatter::to_date);
    let date_listed = row.date_listed.as_deref().and_then(formatter::to_date);
    let transaction_type = match row.transaction_type.as_deref() {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => config.default_transaction_type.clone(),
    };

    Some(ListingRecord {
        id: 0,
        address: row.address.clone().unwrap_or_default(),
        neighborhood: row.neighborhood.clone().unwrap_or_default(),
        bedrooms: formatter::to_float(row.bedrooms.as_deref().unwrap_or("")),
        bathrooms: formatter::to_float(row.bathrooms.as_deref().unwrap_or("")),
        price: formatter::to_float(row.price.as_deref().unwrap_or("")),
        sqft: formatter::to_float(row.sqft.as_deref().unwrap_or("")),
        garage: row.garage.clone().unwrap_or_default(),
        year_built: row.year_built.clone().unwrap_or_default(),
        level: row.level.clone(),
        date_listed,
        date_closed,
        date_transacted: date_closed.or(date_listed),
        source: rules.source(),
        origin_url: row.origin_url.clone().unwrap_or_default(),
        import_job_id: job_id,
        transaction_type,
        sfh: rules.is_single_family(row),
    })
}

// ============================================================================
// BATCH IMPORT
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct ImportStats {
    pub inserted: usize,
    pub discarded: usize,
}

pub fn load_csv(csv_path: &Path) -> Result<Vec<RawListingRow>> {
    let mut rdr = Reader::from_path(csv_path).context("failed to open listings CSV")?;

    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        let row: RawListingRow = result.context("failed to deserialize listing row")?;
        rows.push(row);
    }

    Ok(rows)
}

/// Ingest one batch of raw rows as listing snapshots for the given job.
/// The job's source decides which rules variant shapes each snapshot.
pub fn import_batch(
    conn: &Connection,
    job_id: i64,
    rows: &[RawListingRow],
    config: &PipelineConfig,
) -> Result<ImportStats> {
    let job = db::get_import_job(conn, job_id)?;
    let rules = rules_for(job.source);

    let mut stats = ImportStats::default();
    for row in rows {
        match rules.create_listing(conn, row, job_id, config)? {
            Some(listing) => {
                db::insert_listing(conn, &listing)?;
                stats.inserted += 1;
            }
            None => stats.discarded += 1,
        }
    }

    tracing::info!(
        job_id,
        source = job.source.code(),
        inserted = stats.inserted,
        discarded = stats.discarded,
        "batch ingested"
    );
    Ok(stats)
}

// ============================================================================
// TESTS
// ============================================================================
