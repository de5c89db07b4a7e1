use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::sources::Source;

// ============================================================================
// LISTING SNAPSHOT
// ============================================================================

/// One observed state of a listing within one batch. Immutable once
/// inserted; the only synthetic variant is the deletion tombstone built by
/// the diff generator (date_listed cleared, date_closed = processing date).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingRecord {
    /// Database id; 0 until the record is inserted.
    pub id: i64,
    pub address: String,
    pub neighborhood: String,
    pub bedrooms: f64,
    pub bathrooms: f64,
    pub price: f64,
    pub sqft: f64,
    pub garage: String,
    pub year_built: String,
    pub level: Option<String>,
    pub date_listed: Option<NaiveDate>,
    pub date_closed: Option<NaiveDate>,
    /// Close date if known, else listed date.
    pub date_transacted: Option<NaiveDate>,
    pub source: Source,
    pub origin_url: String,
    pub import_job_id: i64,
    pub transaction_type: String,
    /// Single-family home flag.
    pub sfh: bool,
}

// ============================================================================
// IMPORT DIFF (audit entry)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiffType {
    Created,
    Updated,
    Deleted,
}

impl DiffType {
    pub fn as_str(&self) -> &str {
        match self {
            DiffType::Created => "created",
            DiffType::Updated => "updated",
            DiffType::Deleted => "deleted",
        }
    }

    pub fn from_str(s: &str) -> Option<DiffType> {
        match s {
            "created" => Some(DiffType::Created),
            "updated" => Some(DiffType::Updated),
            "deleted" => Some(DiffType::Deleted),
            _ => None,
        }
    }
}

/// One detected change for a listing between adjacent batches. Carries a
/// full copy of the snapshot's descriptive fields so downstream consumers
/// never have to join back to the listings table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportDiff {
    pub id: i64,
    /// Stable identity for the audit entry, assigned at creation.
    pub diff_uuid: String,
    pub diff_type: DiffType,
    pub address: String,
    pub neighborhood: String,
    pub bedrooms: f64,
    pub bathrooms: f64,
    pub price: f64,
    pub sqft: f64,
    pub garage: String,
    pub year_built: String,
    pub level: Option<String>,
    pub date_listed: Option<NaiveDate>,
    pub date_closed: Option<NaiveDate>,
    pub date_transacted: Option<NaiveDate>,
    pub source: Source,
    pub origin_url: String,
    pub import_job_id: i64,
    pub transaction_type: String,
    pub sfh: bool,
    /// Snapshot id in the predecessor batch (None for created).
    pub old_log_id: Option<i64>,
    /// Snapshot id in the current batch (None for deleted).
    pub new_log_id: Option<i64>,
}

impl ImportDiff {
    /// Build a diff entry from a snapshot. The snapshot's descriptive fields
    /// are copied wholesale; only the diff bookkeeping differs per kind.
    pub fn from_listing(
        listing: &ListingRecord,
        job_id: i64,
        diff_type: DiffType,
        new_log_id: Option<i64>,
        old_log_id: Option<i64>,
    ) -> Self {
        ImportDiff {
            id: 0,
            diff_uuid: uuid::Uuid::new_v4().to_string(),
            diff_type,
            address: listing.address.clone(),
            neighborhood: listing.neighborhood.clone(),
            bedrooms: listing.bedrooms,
            bathrooms: listing.bathrooms,
            price: listing.price,
            sqft: listing.sqft,
            garage: listing.garage.clone(),
            year_built: listing.year_built.clone(),
            level: listing.level.clone(),
            date_listed: listing.date_listed,
            date_closed: listing.date_closed,
            date_transacted: listing.date_transacted,
            source: listing.source,
            origin_url: listing.origin_url.clone(),
            import_job_id: job_id,
            transaction_type: listing.transaction_type.clone(),
            sfh: listing.sfh,
            old_log_id,
            new_log_id,
        }
    }

    /// Hash over the diff uniqueness key (batch, origin_url, source).
    /// Backed by a UNIQUE column, this is what makes diff generation safe
    /// to re-run: at most one diff per listing identity per batch.
    pub fn idempotency_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}|{}|{}",
            self.import_job_id,
            self.origin_url,
            self.source.code()
        ));
        format!("{:x}", hasher.finalize())
    }
}

// ============================================================================
// PROPERTY / TRANSACTION EPISODE / IMPORT JOB
// ============================================================================

/// Canonical latest-known descriptive state of a physical property, keyed
/// by origin_url. Carries no price; pricing lives in the episode history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Property {
    pub id: i64,
    pub address: String,
    pub neighborhood: String,
    pub bedrooms: f64,
    pub bathrooms: f64,
    pub sqft: f64,
    pub year_built: String,
    pub garage: String,
    pub source: Source,
    pub origin_url: String,
    pub level: Option<String>,
    pub sfh: bool,
    /// Written by the external grading pass, never by the reconciler.
    pub grade: Option<String>,
}

/// One listing lifecycle for a property. Open while date_closed is None.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyTransaction {
    pub id: i64,
    pub property_id: i64,
    pub price: f64,
    pub date_listed: Option<NaiveDate>,
    pub date_closed: Option<NaiveDate>,
    pub transaction_type: String,
}

impl PropertyTransaction {
    pub fn is_open(&self) -> bool {
        self.date_closed.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportJob {
    pub id: i64,
    pub source: Source,
    pub abnormal: bool,
    pub added_rows: i64,
    pub modified_rows: i64,
    pub removed_rows: i64,
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS import_jobs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source TEXT NOT NULL,
            abnormal INTEGER NOT NULL DEFAULT 0,
            added_rows INTEGER NOT NULL DEFAULT 0,
            modified_rows INTEGER NOT NULL DEFAULT 0,
            removed_rows INTEGER NOT NULL DEFAULT 0,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS listings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            address TEXT NOT NULL,
            neighborhood TEXT NOT NULL,
            bedrooms REAL NOT NULL,
            bathrooms REAL NOT NULL,
            price REAL NOT NULL,
            sqft REAL NOT NULL,
            garage TEXT NOT NULL,
            year_built TEXT NOT NULL,
            level TEXT,
            date_listed TEXT,
            date_closed TEXT,
            date_transacted TEXT,
            source TEXT NOT NULL,
            origin_url TEXT NOT NULL,
            import_job_id INTEGER NOT NULL,
            transaction_type TEXT NOT NULL,
            sfh INTEGER NOT NULL DEFAULT 0,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS import_diffs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            diff_uuid TEXT UNIQUE NOT NULL,
            idempotency_hash TEXT UNIQUE NOT NULL,
            diff_type TEXT NOT NULL,
            address TEXT NOT NULL,
            neighborhood TEXT NOT NULL,
            bedrooms REAL NOT NULL,
            bathrooms REAL NOT NULL,
            price REAL NOT NULL,
            sqft REAL NOT NULL,
            garage TEXT NOT NULL,
            year_built TEXT NOT NULL,
            level TEXT,
            date_listed TEXT,
            date_closed TEXT,
            date_transacted TEXT,
            source TEXT NOT NULL,
            origin_url TEXT NOT NULL,
            import_job_id INTEGER NOT NULL,
            transaction_type TEXT NOT NULL,
            sfh INTEGER NOT NULL DEFAULT 0,
            old_log_id INTEGER,
            new_log_id INTEGER,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS properties (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            address TEXT NOT NULL,
            neighborhood TEXT NOT NULL,
            bedrooms REAL NOT NULL,
            bathrooms REAL NOT NULL,
            sqft REAL NOT NULL,
            year_built TEXT NOT NULL,
            garage TEXT NOT NULL,
            source TEXT NOT NULL,
            origin_url TEXT UNIQUE NOT NULL,
            level TEXT,
            sfh INTEGER NOT NULL DEFAULT 0,
            grade TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS property_transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            property_id INTEGER NOT NULL,
            price REAL NOT NULL,
            date_listed TEXT,
            date_closed TEXT,
            transaction_type TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_listings_job ON listings(import_job_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_listings_identity
         ON listings(origin_url, source, import_job_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_diffs_job ON import_diffs(import_job_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transactions_property
         ON property_transactions(property_id, transaction_type)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// DATE HELPERS
// ============================================================================

fn sql_date(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format("%Y-%m-%d").to_string())
}

fn date_from_sql(raw: Option<String>) -> Option<NaiveDate> {
    raw.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
}

fn source_from_sql(code: String) -> rusqlite::Result<Source> {
    Source::from_code(&code).ok_or(rusqlite::Error::InvalidQuery)
}

// ============================================================================
// IMPORT JOBS
// ============================================================================

pub fn create_import_job(conn: &Connection, source: Source) -> Result<i64> {
    conn.execute(
        "INSERT INTO import_jobs (source) VALUES (?1)",
        params![source.code()],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_import_job(conn: &Connection, job_id: i64) -> Result<ImportJob> {
    conn.query_row(
        "SELECT id, source, abnormal, added_rows, modified_rows, removed_rows
         FROM import_jobs WHERE id = ?1",
        params![job_id],
        |row| {
            Ok(ImportJob {
                id: row.get(0)?,
                source: source_from_sql(row.get(1)?)?,
                abnormal: row.get::<_, i64>(2)? != 0,
                added_rows: row.get(3)?,
                modified_rows: row.get(4)?,
                removed_rows: row.get(5)?,
            })
        },
    )
    .with_context(|| format!("import job {} not found", job_id))
}

/// Deterministic predecessor pointer: the greatest job id below this one
/// with the same source. None for the first batch of a lineage.
pub fn previous_job_id(conn: &Connection, job_id: i64) -> Result<Option<i64>> {
    let job = get_import_job(conn, job_id)?;
    let prev = conn
        .query_row(
            "SELECT id FROM import_jobs
             WHERE source = ?1 AND id < ?2
             ORDER BY id DESC LIMIT 1",
            params![job.source.code(), job_id],
            |row| row.get::<_, i64>(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;
    Ok(prev)
}

pub fn is_abnormal(conn: &Connection, job_id: i64) -> Result<bool> {
    Ok(get_import_job(conn, job_id)?.abnormal)
}

/// External control operation: flag or clear a batch's abnormal state.
pub fn set_abnormal(conn: &Connection, job_id: i64, abnormal: bool) -> Result<()> {
    conn.execute(
        "UPDATE import_jobs SET abnormal = ?1 WHERE id = ?2",
        params![abnormal as i64, job_id],
    )?;
    Ok(())
}

pub fn set_added_modified_rows(
    conn: &Connection,
    job_id: i64,
    added: i64,
    modified: i64,
) -> Result<()> {
    conn.execute(
        "UPDATE import_jobs SET added_rows = ?1, modified_rows = ?2 WHERE id = ?3",
        params![added, modified, job_id],
    )?;
    Ok(())
}

pub fn set_removed_rows(conn: &Connection, job_id: i64, removed: i64) -> Result<()> {
    conn.execute(
        "UPDATE import_jobs SET removed_rows = ?1 WHERE id = ?2",
        params![removed, job_id],
    )?;
    Ok(())
}

// ============================================================================
// LISTINGS
// ============================================================================

pub fn insert_listing(conn: &Connection, listing: &ListingRecord) -> Result<i64> {
    conn.execute(
        "INSERT INTO listings (
            address, neighborhood, bedrooms, bathrooms, price, sqft,
            garage, year_built, level, date_listed, date_closed,
            date_transacted, source, origin_url, import_job_id,
            transaction_type, sfh
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        params![
            listing.address,
            listing.neighborhood,
            listing.bedrooms,
            listing.bathrooms,
            listing.price,
            listing.sqft,
            listing.garage,
            listing.year_built,
            listing.level,
            sql_date(listing.date_listed),
            sql_date(listing.date_closed),
            sql_date(listing.date_transacted),
            listing.source.code(),
            listing.origin_url,
            listing.import_job_id,
            listing.transaction_type,
            listing.sfh as i64,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn listing_from_row(row: &Row) -> rusqlite::Result<ListingRecord> {
    Ok(ListingRecord {
        id: row.get(0)?,
        address: row.get(1)?,
        neighborhood: row.get(2)?,
        bedrooms: row.get(3)?,
        bathrooms: row.get(4)?,
        price: row.get(5)?,
        sqft: row.get(6)?,
        garage: row.get(7)?,
        year_built: row.get(8)?,
        level: row.get(9)?,
        date_listed: date_from_sql(row.get(10)?),
        date_closed: date_from_sql(row.get(11)?),
        date_transacted: date_from_sql(row.get(12)?),
        source: source_from_sql(row.get(13)?)?,
        origin_url: row.get(14)?,
        import_job_id: row.get(15)?,
        transaction_type: row.get(16)?,
        sfh: row.get::<_, i64>(17)? != 0,
    })
}

const LISTING_COLUMNS: &str = "id, address, neighborhood, bedrooms, bathrooms, price, sqft,
    garage, year_built, level, date_listed, date_closed, date_transacted,
    source, origin_url, import_job_id, transaction_type, sfh";

/// All snapshots of a batch in ascending transacted-date order. The order
/// only shapes progress output; NULL dates sort first, ties by insert order.
pub fn listings_for_job_sorted(conn: &Connection, job_id: i64) -> Result<Vec<ListingRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM listings WHERE import_job_id = ?1
         ORDER BY date_transacted ASC, id ASC",
        LISTING_COLUMNS
    ))?;
    let listings = stmt
        .query_map(params![job_id], listing_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(listings)
}

/// Same-identity lookup across batches: (origin_url, source) within a job.
pub fn find_listing_in_job(
    conn: &Connection,
    origin_url: &str,
    source: Source,
    job_id: i64,
) -> Result<Option<ListingRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM listings
         WHERE origin_url = ?1 AND source = ?2 AND import_job_id = ?3
         LIMIT 1",
        LISTING_COLUMNS
    ))?;
    let mut rows = stmt.query_map(params![origin_url, source.code(), job_id], listing_from_row)?;
    match rows.next() {
        Some(listing) => Ok(Some(listing?)),
        None => Ok(None),
    }
}

/// Most recently inserted snapshot for an origin_url within a job,
/// regardless of source. Used by Zillow's transaction-type inference.
pub fn last_listing_for_origin_in_job(
    conn: &Connection,
    origin_url: &str,
    job_id: i64,
) -> Result<Option<ListingRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM listings
         WHERE origin_url = ?1 AND import_job_id = ?2
         ORDER BY id DESC LIMIT 1",
        LISTING_COLUMNS
    ))?;
    let mut rows = stmt.query_map(params![origin_url, job_id], listing_from_row)?;
    match rows.next() {
        Some(listing) => Ok(Some(listing?)),
        None => Ok(None),
    }
}

// ============================================================================
// IMPORT DIFFS
// ============================================================================

/// Insert a diff entry unless one already exists for the same
/// (batch, origin_url, source) key. Returns true when a row was written.
///
/// The existence check and the insert are a single statement: the UNIQUE
/// idempotency_hash column turns a duplicate attempt into a constraint
/// violation, which is swallowed. Concurrent re-runs of the same batch
/// cannot produce duplicate audit entries.
pub fn insert_import_diff(conn: &Connection, diff: &ImportDiff) -> Result<bool> {
    let result = conn.execute(
        "INSERT INTO import_diffs (
            diff_uuid, idempotency_hash, diff_type, address, neighborhood,
            bedrooms, bathrooms, price, sqft, garage, year_built, level,
            date_listed, date_closed, date_transacted, source, origin_url,
            import_job_id, transaction_type, sfh, old_log_id, new_log_id
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                  ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)",
        params![
            diff.diff_uuid,
            diff.idempotency_hash(),
            diff.diff_type.as_str(),
            diff.address,
            diff.neighborhood,
            diff.bedrooms,
            diff.bathrooms,
            diff.price,
            diff.sqft,
            diff.garage,
            diff.year_built,
            diff.level,
            sql_date(diff.date_listed),
            sql_date(diff.date_closed),
            sql_date(diff.date_transacted),
            diff.source.code(),
            diff.origin_url,
            diff.import_job_id,
            diff.transaction_type,
            diff.sfh as i64,
            diff.old_log_id,
            diff.new_log_id,
        ],
    );

    match result {
        Ok(_) => Ok(true),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

fn diff_from_row(row: &Row) -> rusqlite::Result<ImportDiff> {
    let diff_type: String = row.get(2)?;
    Ok(ImportDiff {
        id: row.get(0)?,
        diff_uuid: row.get(1)?,
        diff_type: DiffType::from_str(&diff_type).ok_or(rusqlite::Error::InvalidQuery)?,
        address: row.get(3)?,
        neighborhood: row.get(4)?,
        bedrooms: row.get(5)?,
        bathrooms: row.get(6)?,
        price: row.get(7)?,
        sqft: row.get(8)?,
        garage: row.get(9)?,
        year_built: row.get(10)?,
        level: row.get(11)?,
        date_listed: date_from_sql(row.get(12)?),
        date_closed: date_from_sql(row.get(13)?),
        date_transacted: date_from_sql(row.get(14)?),
        source: source_from_sql(row.get(15)?)?,
        origin_url: row.get(16)?,
        import_job_id: row.get(17)?,
        transaction_type: row.get(18)?,
        sfh: row.get::<_, i64>(19)? != 0,
        old_log_id: row.get(20)?,
        new_log_id: row.get(21)?,
    })
}

const DIFF_COLUMNS: &str = "id, diff_uuid, diff_type, address, neighborhood, bedrooms,
    bathrooms, price, sqft, garage, year_built, level, date_listed,
    date_closed, date_transacted, source, origin_url, import_job_id,
    transaction_type, sfh, old_log_id, new_log_id";

pub fn diffs_for_job(conn: &Connection, job_id: i64) -> Result<Vec<ImportDiff>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM import_diffs WHERE import_job_id = ?1 ORDER BY id ASC",
        DIFF_COLUMNS
    ))?;
    let diffs = stmt
        .query_map(params![job_id], diff_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(diffs)
}

pub fn count_diffs_for_job(conn: &Connection, job_id: i64) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM import_diffs WHERE import_job_id = ?1",
        params![job_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

// ============================================================================
// PROPERTIES
// ============================================================================

fn property_from_row(row: &Row) -> rusqlite::Result<Property> {
    Ok(Property {
        id: row.get(0)?,
        address: row.get(1)?,
        neighborhood: row.get(2)?,
        bedrooms: row.get(3)?,
        bathrooms: row.get(4)?,
        sqft: row.get(5)?,
        year_built: row.get(6)?,
        garage: row.get(7)?,
        source: source_from_sql(row.get(8)?)?,
        origin_url: row.get(9)?,
        level: row.get(10)?,
        sfh: row.get::<_, i64>(11)? != 0,
        grade: row.get(12)?,
    })
}

const PROPERTY_COLUMNS: &str = "id, address, neighborhood, bedrooms, bathrooms, sqft,
    year_built, garage, source, origin_url, level, sfh, grade";

pub fn find_property(conn: &Connection, origin_url: &str) -> Result<Option<Property>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM properties WHERE origin_url = ?1 LIMIT 1",
        PROPERTY_COLUMNS
    ))?;
    let mut rows = stmt.query_map(params![origin_url], property_from_row)?;
    match rows.next() {
        Some(property) => Ok(Some(property?)),
        None => Ok(None),
    }
}

pub fn insert_property(conn: &Connection, property: &Property) -> Result<i64> {
    conn.execute(
        "INSERT INTO properties (
            address, neighborhood, bedrooms, bathrooms, sqft, year_built,
            garage, source, origin_url, level, sfh
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            property.address,
            property.neighborhood,
            property.bedrooms,
            property.bathrooms,
            property.sqft,
            property.year_built,
            property.garage,
            property.source.code(),
            property.origin_url,
            property.level,
            property.sfh as i64,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Full replace of the descriptive fields, keyed by origin_url. The source
/// column is deliberately left alone: it records who first discovered the
/// property.
pub fn update_property(conn: &Connection, property: &Property) -> Result<()> {
    conn.execute(
        "UPDATE properties SET
            address = ?1, neighborhood = ?2, bedrooms = ?3, bathrooms = ?4,
            sqft = ?5, year_built = ?6, garage = ?7, level = ?8, sfh = ?9,
            updated_at = CURRENT_TIMESTAMP
         WHERE origin_url = ?10",
        params![
            property.address,
            property.neighborhood,
            property.bedrooms,
            property.bathrooms,
            property.sqft,
            property.year_built,
            property.garage,
            property.level,
            property.sfh as i64,
            property.origin_url,
        ],
    )?;
    Ok(())
}

pub fn all_properties(conn: &Connection) -> Result<Vec<Property>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM properties ORDER BY id ASC",
        PROPERTY_COLUMNS
    ))?;
    let properties = stmt
        .query_map([], property_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(properties)
}

pub fn set_property_grade(conn: &Connection, property_id: i64, grade: &str) -> Result<()> {
    conn.execute(
        "UPDATE properties SET grade = ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2",
        params![grade, property_id],
    )?;
    Ok(())
}

// ============================================================================
// TRANSACTION EPISODES
// ============================================================================

fn transaction_from_row(row: &Row) -> rusqlite::Result<PropertyTransaction> {
    Ok(PropertyTransaction {
        id: row.get(0)?,
        property_id: row.get(1)?,
        price: row.get(2)?,
        date_listed: date_from_sql(row.get(3)?),
        date_closed: date_from_sql(row.get(4)?),
        transaction_type: row.get(5)?,
    })
}

const TRANSACTION_COLUMNS: &str =
    "id, property_id, price, date_listed, date_closed, transaction_type";

pub fn transactions_for_property(
    conn: &Connection,
    property_id: i64,
    transaction_type: &str,
) -> Result<Vec<PropertyTransaction>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM property_transactions
         WHERE property_id = ?1 AND transaction_type = ?2
         ORDER BY id ASC",
        TRANSACTION_COLUMNS
    ))?;
    let transactions = stmt
        .query_map(params![property_id, transaction_type], transaction_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(transactions)
}

pub fn get_transaction(conn: &Connection, id: i64) -> Result<PropertyTransaction> {
    conn.query_row(
        &format!(
            "SELECT {} FROM property_transactions WHERE id = ?1",
            TRANSACTION_COLUMNS
        ),
        params![id],
        transaction_from_row,
    )
    .with_context(|| format!("property transaction {} not found", id))
}

pub fn insert_property_transaction(
    conn: &Connection,
    transaction: &PropertyTransaction,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO property_transactions (
            property_id, price, date_listed, date_closed, transaction_type
        ) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            transaction.property_id,
            transaction.price,
            sql_date(transaction.date_listed),
            sql_date(transaction.date_closed),
            transaction.transaction_type,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Merge-style date update: each date is overwritten only when a value is
/// supplied, so a non-null close date can never be nulled back out.
pub fn update_transaction_dates(
    conn: &Connection,
    id: i64,
    date_listed: Option<NaiveDate>,
    date_closed: Option<NaiveDate>,
) -> Result<()> {
    if let Some(listed) = date_listed {
        conn.execute(
            "UPDATE property_transactions SET date_listed = ?1 WHERE id = ?2",
            params![sql_date(Some(listed)), id],
        )?;
    }
    if let Some(closed) = date_closed {
        conn.execute(
            "UPDATE property_transactions SET date_closed = ?1 WHERE id = ?2",
            params![sql_date(Some(closed)), id],
        )?;
    }
    Ok(())
}

// ============================================================================
// TEST HELPERS
// ============================================================================

/// Minimal listing snapshot for tests. Callers override what they need.
#[cfg(test)]
pub fn test_listing(origin_url: &str, source: Source, job_id: i64) -> ListingRecord {
    ListingRecord {
        id: 0,
        address: "123 Test St".to_string(),
        neighborhood: "Mission".to_string(),
        bedrooms: 2.0,
        bathrooms: 1.0,
        price: 200_000.0,
        sqft: 1_000.0,
        garage: "1".to_string(),
        year_built: "1970".to_string(),
        level: None,
        date_listed: NaiveDate::from_ymd_opt(2015, 1, 15),
        date_closed: None,
        date_transacted: NaiveDate::from_ymd_opt(2015, 1, 15),
        source,
        origin_url: origin_url.to_string(),
        import_job_id: job_id,
        transaction_type: "rental".to_string(),
        sfh: false,
    }
}
