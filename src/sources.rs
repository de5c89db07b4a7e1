// Source registry - one rules variant per listing feed
//
// Every per-source behavior lives behind the SourceRules trait: change
// classification between adjacent batches, the default listed date, single
// family detection, and source-specific snapshot creation. Adding a feed
// means adding a variant here; the diff generator and reconcilers never
// change.

use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::db::{self, ListingRecord};
use crate::error::PipelineError;
use crate::formatter;
use crate::ingest::{base_listing, RawListingRow};

// ============================================================================
// SOURCE TAG
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    Zillow,
    ClimbSfRented,
}

impl Source {
    /// Human-readable name for display
    pub fn name(&self) -> &str {
        match self {
            Source::Zillow => "Zillow",
            Source::ClimbSfRented => "ClimbSF (rented)",
        }
    }

    /// Stable code stored in the database
    pub fn code(&self) -> &str {
        match self {
            Source::Zillow => "zillow",
            Source::ClimbSfRented => "climbsf_rented",
        }
    }

    pub fn from_code(code: &str) -> Option<Source> {
        match code {
            "zillow" => Some(Source::Zillow),
            "climbsf_rented" => Some(Source::ClimbSfRented),
            _ => None,
        }
    }

    pub fn parse(code: &str) -> Result<Source, PipelineError> {
        Source::from_code(code).ok_or_else(|| PipelineError::UnknownSource(code.to_string()))
    }
}

// ============================================================================
// SOURCE RULES - capability interface
// ============================================================================

/// Per-source behavior, selected once by source tag via [`rules_for`].
///
/// Trait defaults are the conservative baseline: snapshots are presumed
/// unchanged unless a variant says otherwise, so attribute drift outside a
/// variant's compared fields never produces a diff.
pub trait SourceRules: Send + Sync {
    fn source(&self) -> Source;

    /// Has this listing changed between adjacent batches?
    /// Default: no. A source with no explicit rule emits no updated diffs.
    fn is_changed(&self, _old: &ListingRecord, _new: &ListingRecord) -> bool {
        false
    }

    /// Default listed date used when an open episode carries none.
    /// Default: none - sources that track listing dates need no fallback.
    fn default_date_listed(&self, _today: NaiveDate) -> Option<NaiveDate> {
        None
    }

    /// Does this row describe a single-family home? Default: no.
    fn is_single_family(&self, _row: &RawListingRow) -> bool {
        false
    }

    /// Build a listing snapshot from a raw row, or None when the row is
    /// discarded. Variants override this by calling [`base_listing`] and
    /// then applying their own adjustments - explicit composition, one
    /// direction only.
    fn create_listing(
        &self,
        _conn: &Connection,
        row: &RawListingRow,
        job_id: i64,
        config: &PipelineConfig,
    ) -> Result<Option<ListingRecord>> {
        Ok(base_listing(row, self, job_id, config))
    }
}

/// Resolve the rules variant for a source tag.
pub fn rules_for(source: Source) -> Box<dyn SourceRules> {
    match source {
        Source::Zillow => Box::new(ZillowRules),
        Source::ClimbSfRented => Box::new(ClimbSfRentedRules),
    }
}

// ============================================================================
// ZILLOW
// ============================================================================

/// Zillow feed: dirty price markers, prices embedded in prose, rows without
/// a transaction type, and two-digit-year dates.
pub struct ZillowRules;

impl ZillowRules {
    /// Rows whose price field carries a placeholder marker are dropped
    /// before any other processing.
    fn is_dirty(&self, row: &RawListingRow) -> bool {
        let price = row.price.as_deref().unwrap_or("");
        price.contains("--") || price.contains("xxx")
    }

    /// Extract the leading digits-and-commas run from a price string
    /// ("$2,450/mo" -> "2,450").
    fn clean_price(raw: &str) -> String {
        let start = match raw.find(|c: char| c.is_ascii_digit()) {
            Some(i) => i,
            None => return String::new(),
        };
        raw[start..]
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == ',')
            .collect()
    }

    /// Zillow rows often lack a transaction type. Inherit it from an earlier
    /// snapshot of the same listing in this batch; failing that, assume
    /// rental unless the price clears the sales threshold.
    fn infer_transaction_type(
        &self,
        conn: &Connection,
        row: &RawListingRow,
        job_id: i64,
        config: &PipelineConfig,
    ) -> Result<String> {
        let origin_url = row.origin_url.as_deref().unwrap_or("");
        if let Some(prior) = db::last_listing_for_origin_in_job(conn, origin_url, job_id)? {
            return Ok(prior.transaction_type);
        }

        let price = formatter::to_float(row.price.as_deref().unwrap_or(""));
        if price > config.sales_price_threshold {
            Ok("sales".to_string())
        } else {
            Ok(config.default_transaction_type.clone())
        }
    }
}

impl SourceRules for ZillowRules {
    fn source(&self) -> Source {
        Source::Zillow
    }

    /// Zillow only exposes price movement reliably, so price alone decides.
    fn is_changed(&self, old: &ListingRecord, new: &ListingRecord) -> bool {
        old.price != new.price
    }

    /// Zillow does not track listing dates; open episodes fall back to the
    /// processing date.
    fn default_date_listed(&self, today: NaiveDate) -> Option<NaiveDate> {
        Some(today)
    }

    fn create_listing(
        &self,
        conn: &Connection,
        row: &RawListingRow,
        job_id: i64,
        config: &PipelineConfig,
    ) -> Result<Option<ListingRecord>> {
        if self.is_dirty(row) {
            tracing::debug!(
                origin_url = row.origin_url.as_deref().unwrap_or(""),
                "dirty zillow row discarded"
            );
            return Ok(None);
        }

        let mut row = row.clone();
        row.price = row.price.as_deref().map(Self::clean_price);
        if row.transaction_type.as_deref().map_or(true, str::is_empty) {
            row.transaction_type = Some(self.infer_transaction_type(conn, &row, job_id, config)?);
        }

        let mut listing = match base_listing(&row, self, job_id, config) {
            Some(listing) => listing,
            None => return Ok(None),
        };

        // Zillow ships two-digit years; re-parse both dates with the short
        // form and recompute the transacted date.
        listing.date_closed = row
            .date_closed
            .as_deref()
            .and_then(formatter::to_date_short_year);
        listing.date_listed = row
            .date_listed
            .as_deref()
            .and_then(formatter::to_date_short_year);
        listing.date_transacted = listing.date_closed.or(listing.date_listed);

        Ok(Some(listing))
    }
}

// ============================================================================
// CLIMBSF (RENTED)
// ============================================================================

/// ClimbSF rented feed: clean rows, but closings show up as a date change on
/// an existing listing rather than a new row.
pub struct ClimbSfRentedRules;

impl SourceRules for ClimbSfRentedRules {
    fn source(&self) -> Source {
        Source::ClimbSfRented
    }

    /// Price and close date jointly decide: a closing with an unchanged
    /// price still has to produce an updated diff.
    fn is_changed(&self, old: &ListingRecord, new: &ListingRecord) -> bool {
        old.price != new.price || old.date_closed != new.date_closed
    }
}

// ============================================================================
// TESTS
// ============================================================================
