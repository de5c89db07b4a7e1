// Property reconciler - canonical registry upsert
//
// Replays a batch's diff entries onto the properties table. Every diff
// kind upserts, deleted included: a vanished listing still carries the
// latest descriptive state we saw, and the registry keeps no delisting
// marker. Removal is simply not modeled here.

use anyhow::Result;
use rusqlite::Connection;

use crate::db::{self, ImportDiff, Property};
use crate::error::PipelineError;

/// Boundary to the external grade-recomputation pass, run once per
/// reconciled batch after all upserts have landed.
pub trait PropertyGrader {
    fn set_property_grades(&self, conn: &Connection) -> Result<()>;
}

/// Default grader: leaves grades untouched.
pub struct NoopGrader;

impl PropertyGrader for NoopGrader {
    fn set_property_grades(&self, _conn: &Connection) -> Result<()> {
        Ok(())
    }
}

/// Reconcile the property registry from a batch's diff entries.
///
/// Fatal precondition: an abnormal batch fails before any diff is read.
/// A malformed diff aborts the run; downstream consumers assume a finished
/// batch was applied completely, so there is no continue-on-error mode.
pub fn generate_properties(
    conn: &Connection,
    job_id: i64,
    grader: &dyn PropertyGrader,
) -> Result<usize> {
    if db::is_abnormal(conn, job_id)? {
        return Err(PipelineError::AbnormalBatch { job_id }.into());
    }

    tracing::info!(job_id, "reconciling properties");
    let mut processed = 0;
    for diff in db::diffs_for_job(conn, job_id)? {
        upsert_property(conn, &diff)?;
        processed += 1;
    }

    grader.set_property_grades(conn)?;
    tracing::info!(job_id, processed, "property reconciliation complete");
    Ok(processed)
}

/// Create or fully replace the property behind a diff entry. Replacement
/// reassigns every descriptive field from the diff; nothing is merged.
pub fn upsert_property(conn: &Connection, diff: &ImportDiff) -> Result<()> {
    if diff.origin_url.is_empty() {
        return Err(PipelineError::MalformedRecord(format!(
            "diff {} has no origin_url",
            diff.diff_uuid
        ))
        .into());
    }

    match db::find_property(conn, &diff.origin_url)? {
        None => {
            tracing::debug!(
                origin_url = %diff.origin_url,
                source = diff.source.code(),
                "new property"
            );
            let property = Property {
                id: 0,
                address: diff.address.clone(),
                neighborhood: diff.neighborhood.clone(),
                bedrooms: diff.bedrooms,
                bathrooms: diff.bathrooms,
                sqft: diff.sqft,
                year_built: diff.year_built.clone(),
                garage: diff.garage.clone(),
                source: diff.source,
                origin_url: diff.origin_url.clone(),
                level: diff.level.clone(),
                sfh: diff.sfh,
                grade: None,
            };
            db::insert_property(conn, &property)?;
        }
        Some(mut property) => {
            tracing::debug!(origin_url = %diff.origin_url, "updating property");
            property.address = diff.address.clone();
            property.neighborhood = diff.neighborhood.clone();
            property.bedrooms = diff.bedrooms;
            property.bathrooms = diff.bathrooms;
            property.sqft = diff.sqft;
            property.year_built = diff.year_built.clone();
            property.garage = diff.garage.clone();
            property.level = diff.level.clone();
            property.sfh = diff.sfh;
            db::update_property(conn, &property)?;
        }
    }

    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
