// Diff generator - adjacent-batch change detection
//
// Joins the current batch against its predecessor by listing identity
// (origin_url, source), classifies each pair through the source's rules
// variant, and records every change as an immutable import_diff audit
// entry. Re-running on the same batch pair is a no-op: diff inserts are
// deduplicated by the (batch, origin_url, source) uniqueness key and the
// batch counters are recomputed, not accumulated.

use anyhow::Result;
use chrono::Utc;
use rusqlite::Connection;

use crate::db::{self, DiffType, ImportDiff, ListingRecord};
use crate::sources::rules_for;

/// Rollup counters written onto the batch record, overwritten per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiffSummary {
    pub added_rows: i64,
    pub modified_rows: i64,
    pub removed_rows: i64,
}

/// Diff one batch against its immediate predecessor. Runs the
/// created/updated pass, then the deleted pass, and writes the rollup
/// counters onto the import job.
pub fn generate_import_diffs(conn: &Connection, job_id: i64) -> Result<DiffSummary> {
    tracing::info!(job_id, "generating import diffs");
    let (added_rows, modified_rows) = generate_created_and_modified_diffs(conn, job_id)?;
    let removed_rows = generate_deleted_diffs(conn, job_id)?;

    Ok(DiffSummary {
        added_rows,
        modified_rows,
        removed_rows,
    })
}

/// Pass 1: walk the current batch in ascending transacted-date order and
/// emit created/updated diffs. The ordering only shapes log output; the
/// resulting diff set is order-independent.
fn generate_created_and_modified_diffs(conn: &Connection, job_id: i64) -> Result<(i64, i64)> {
    let previous_job_id = db::previous_job_id(conn, job_id)?;

    let mut added_rows = 0;
    let mut modified_rows = 0;

    match previous_job_id {
        // First batch of this lineage: everything is a creation.
        None => {
            for listing in db::listings_for_job_sorted(conn, job_id)? {
                record_diff(conn, job_id, &listing, DiffType::Created, Some(listing.id), None)?;
                added_rows += 1;
            }
        }

        Some(prev_job_id) => {
            for listing in db::listings_for_job_sorted(conn, job_id)? {
                let previous = db::find_listing_in_job(
                    conn,
                    &listing.origin_url,
                    listing.source,
                    prev_job_id,
                )?;

                match previous {
                    None => {
                        tracing::debug!(
                            origin_url = %listing.origin_url,
                            prev_job_id,
                            "not in previous batch"
                        );
                        record_diff(
                            conn,
                            job_id,
                            &listing,
                            DiffType::Created,
                            Some(listing.id),
                            None,
                        )?;
                        added_rows += 1;
                    }
                    Some(prev) if rules_for(listing.source).is_changed(&prev, &listing) => {
                        tracing::debug!(origin_url = %listing.origin_url, "change detected");
                        record_diff(
                            conn,
                            job_id,
                            &listing,
                            DiffType::Updated,
                            Some(listing.id),
                            Some(prev.id),
                        )?;
                        modified_rows += 1;
                    }
                    Some(_) => {
                        tracing::debug!(origin_url = %listing.origin_url, "no change");
                    }
                }
            }
        }
    }

    db::set_added_modified_rows(conn, job_id, added_rows, modified_rows)?;
    Ok((added_rows, modified_rows))
}

/// Pass 2: walk the predecessor batch and emit a deleted diff for every
/// listing identity that vanished, using a tombstone snapshot (listed date
/// cleared, close date = processing date). Skipped entirely when there is
/// no predecessor.
fn generate_deleted_diffs(conn: &Connection, job_id: i64) -> Result<i64> {
    let prev_job_id = match db::previous_job_id(conn, job_id)? {
        Some(id) => id,
        None => {
            db::set_removed_rows(conn, job_id, 0)?;
            return Ok(0);
        }
    };

    let processing_date = Utc::now().date_naive();
    let mut removed_rows = 0;

    for prev in db::listings_for_job_sorted(conn, prev_job_id)? {
        let current =
            db::find_listing_in_job(conn, &prev.origin_url, prev.source, job_id)?;
        if current.is_some() {
            continue;
        }

        tracing::debug!(
            origin_url = %prev.origin_url,
            job_id,
            "listing gone from current batch"
        );

        let mut tombstone = prev.clone();
        tombstone.date_listed = None;
        tombstone.date_closed = Some(processing_date);
        record_diff(conn, job_id, &tombstone, DiffType::Deleted, None, Some(prev.id))?;
        removed_rows += 1;
    }

    db::set_removed_rows(conn, job_id, removed_rows)?;
    Ok(removed_rows)
}

fn record_diff(
    conn: &Connection,
    job_id: i64,
    listing: &ListingRecord,
    diff_type: DiffType,
    new_log_id: Option<i64>,
    old_log_id: Option<i64>,
) -> Result<()> {
    let diff = ImportDiff::from_listing(listing, job_id, diff_type, new_log_id, old_log_id);
    if db::insert_import_diff(conn, &diff)? {
        tracing::debug!(
            origin_url = %diff.origin_url,
            diff_type = diff.diff_type.as_str(),
            "diff recorded"
        );
    } else {
        tracing::debug!(
            origin_url = %diff.origin_url,
            "diff already recorded, skipping"
        );
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_listing;
    use crate::sources::Source;
    use chrono::NaiveDate;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        db::setup_database(&conn).unwrap();
        conn
    }

    fn insert(conn: &Connection, listing: &ListingRecord) -> i64 {
        db::insert_listing(conn, listing).unwrap()
    }

    #[test]
    fn test_first_batch_everything_created() {
        // Scenario 1: J1 has no predecessor and contains A, B.
        let conn = setup();
        let j1 = db::create_import_job(&conn, Source::ClimbSfRented).unwrap();
        insert(&conn, &test_listing("http://c/a", Source::ClimbSfRented, j1));
        insert(&conn, &test_listing("http://c/b", Source::ClimbSfRented, j1));

        let summary = generate_import_diffs(&conn, j1).unwrap();
        assert_eq!(summary.added_rows, 2);
        assert_eq!(summary.modified_rows, 0);
        assert_eq!(summary.removed_rows, 0);

        let diffs = db::diffs_for_job(&conn, j1).unwrap();
        assert_eq!(diffs.len(), 2);
        assert!(diffs.iter().all(|d| d.diff_type == DiffType::Created));
        assert!(diffs.iter().all(|d| d.old_log_id.is_none()));
        assert!(diffs.iter().all(|d| d.new_log_id.is_some()));

        let job = db::get_import_job(&conn, j1).unwrap();
        assert_eq!((job.added_rows, job.modified_rows, job.removed_rows), (2, 0, 0));
    }

    #[test]
    fn test_adjacent_batch_created_updated_deleted() {
        // Scenario 2: J2 has A' (price 200000 -> 195000) and new C; B gone.
        let conn = setup();
        let j1 = db::create_import_job(&conn, Source::Zillow).unwrap();
        let a1 = insert(&conn, &test_listing("http://z/a", Source::Zillow, j1));
        let b1 = insert(&conn, &test_listing("http://z/b", Source::Zillow, j1));
        generate_import_diffs(&conn, j1).unwrap();

        let j2 = db::create_import_job(&conn, Source::Zillow).unwrap();
        let mut a2 = test_listing("http://z/a", Source::Zillow, j2);
        a2.price = 195_000.0;
        let a2_id = insert(&conn, &a2);
        let c2_id = insert(&conn, &test_listing("http://z/c", Source::Zillow, j2));

        let summary = generate_import_diffs(&conn, j2).unwrap();
        assert_eq!(summary.added_rows, 1);
        assert_eq!(summary.modified_rows, 1);
        assert_eq!(summary.removed_rows, 1);

        let diffs = db::diffs_for_job(&conn, j2).unwrap();
        assert_eq!(diffs.len(), 3);

        let updated = diffs
            .iter()
            .find(|d| d.diff_type == DiffType::Updated)
            .expect("updated diff for A");
        assert_eq!(updated.origin_url, "http://z/a");
        assert_eq!(updated.price, 195_000.0);
        assert_eq!(updated.new_log_id, Some(a2_id));
        assert_eq!(updated.old_log_id, Some(a1));

        let created = diffs
            .iter()
            .find(|d| d.diff_type == DiffType::Created)
            .expect("created diff for C");
        assert_eq!(created.origin_url, "http://z/c");
        assert_eq!(created.new_log_id, Some(c2_id));
        assert_eq!(created.old_log_id, None);

        let deleted = diffs
            .iter()
            .find(|d| d.diff_type == DiffType::Deleted)
            .expect("deleted diff for B");
        assert_eq!(deleted.origin_url, "http://z/b");
        assert_eq!(deleted.new_log_id, None);
        assert_eq!(deleted.old_log_id, Some(b1));
        // Tombstone: listed date cleared, close date = processing date.
        assert_eq!(deleted.date_listed, None);
        assert_eq!(deleted.date_closed, Some(Utc::now().date_naive()));
    }

    #[test]
    fn test_unchanged_listing_emits_nothing() {
        let conn = setup();
        let j1 = db::create_import_job(&conn, Source::Zillow).unwrap();
        insert(&conn, &test_listing("http://z/a", Source::Zillow, j1));
        generate_import_diffs(&conn, j1).unwrap();

        let j2 = db::create_import_job(&conn, Source::Zillow).unwrap();
        insert(&conn, &test_listing("http://z/a", Source::Zillow, j2));

        let summary = generate_import_diffs(&conn, j2).unwrap();
        assert_eq!(summary, DiffSummary::default());
        assert_eq!(db::count_diffs_for_job(&conn, j2).unwrap(), 0);
    }

    #[test]
    fn test_zillow_ignores_close_date_drift() {
        // Zillow's rule compares price only: a close-date change alone
        // stays invisible to diffing.
        let conn = setup();
        let j1 = db::create_import_job(&conn, Source::Zillow).unwrap();
        insert(&conn, &test_listing("http://z/a", Source::Zillow, j1));
        generate_import_diffs(&conn, j1).unwrap();

        let j2 = db::create_import_job(&conn, Source::Zillow).unwrap();
        let mut a2 = test_listing("http://z/a", Source::Zillow, j2);
        a2.date_closed = NaiveDate::from_ymd_opt(2015, 3, 1);
        insert(&conn, &a2);

        let summary = generate_import_diffs(&conn, j2).unwrap();
        assert_eq!(summary.modified_rows, 0);
        assert_eq!(db::count_diffs_for_job(&conn, j2).unwrap(), 0);
    }

    #[test]
    fn test_climbsf_close_date_is_a_change() {
        let conn = setup();
        let j1 = db::create_import_job(&conn, Source::ClimbSfRented).unwrap();
        insert(&conn, &test_listing("http://c/a", Source::ClimbSfRented, j1));
        generate_import_diffs(&conn, j1).unwrap();

        let j2 = db::create_import_job(&conn, Source::ClimbSfRented).unwrap();
        let mut a2 = test_listing("http://c/a", Source::ClimbSfRented, j2);
        a2.date_closed = NaiveDate::from_ymd_opt(2015, 3, 1);
        insert(&conn, &a2);

        let summary = generate_import_diffs(&conn, j2).unwrap();
        assert_eq!(summary.modified_rows, 1);
    }

    #[test]
    fn test_diff_generation_is_idempotent() {
        let conn = setup();
        let j1 = db::create_import_job(&conn, Source::Zillow).unwrap();
        insert(&conn, &test_listing("http://z/a", Source::Zillow, j1));
        insert(&conn, &test_listing("http://z/b", Source::Zillow, j1));

        let first = generate_import_diffs(&conn, j1).unwrap();
        let diffs_before = db::diffs_for_job(&conn, j1).unwrap();

        let second = generate_import_diffs(&conn, j1).unwrap();
        let diffs_after = db::diffs_for_job(&conn, j1).unwrap();

        assert_eq!(first, second);
        assert_eq!(diffs_before.len(), diffs_after.len());
        let ids_before: Vec<i64> = diffs_before.iter().map(|d| d.id).collect();
        let ids_after: Vec<i64> = diffs_after.iter().map(|d| d.id).collect();
        assert_eq!(ids_before, ids_after);

        let job = db::get_import_job(&conn, j1).unwrap();
        assert_eq!((job.added_rows, job.modified_rows, job.removed_rows), (2, 0, 0));
    }

    #[test]
    fn test_tombstone_keeps_transacted_date() {
        let conn = setup();
        let j1 = db::create_import_job(&conn, Source::ClimbSfRented).unwrap();
        let mut a1 = test_listing("http://c/a", Source::ClimbSfRented, j1);
        a1.date_transacted = NaiveDate::from_ymd_opt(2015, 1, 15);
        insert(&conn, &a1);
        generate_import_diffs(&conn, j1).unwrap();

        let j2 = db::create_import_job(&conn, Source::ClimbSfRented).unwrap();
        generate_import_diffs(&conn, j2).unwrap();

        let diffs = db::diffs_for_job(&conn, j2).unwrap();
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].diff_type, DiffType::Deleted);
        // The tombstone rewrites the listed/closed dates but not the
        // transacted date the snapshot was originally filed under.
        assert_eq!(
            diffs[0].date_transacted,
            NaiveDate::from_ymd_opt(2015, 1, 15)
        );
    }
}
