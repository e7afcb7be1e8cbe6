//! Message series repository and number sequences.
//!
//! # Invariants
//! - Series MRN formats are unique across all series.
//! - `next_number` is atomic per `(series_id, year)`; numbers start at 1.

use crate::model::message::MainType;
use crate::model::series::{MessageSeries, NumberSequenceType};
use crate::repo::{ensure_connection_ready, map_constraint_error, RepoError, RepoResult};
use rusqlite::{params, Connection, OptionalExtension, Row};

/// Year key used by sequences that never reset.
const CONTINUOUS_SEQUENCE_YEAR: i32 = 0;

pub trait SeriesRepository {
    fn create_series(&self, series: &MessageSeries) -> RepoResult<()>;
    fn update_series(&self, series: &MessageSeries) -> RepoResult<()>;
    fn get_series(&self, series_id: &str) -> RepoResult<Option<MessageSeries>>;
    fn list_series(&self) -> RepoResult<Vec<MessageSeries>>;
    /// Allocates the next message number for `series_id` in `year`.
    ///
    /// Continuous series ignore `year`.
    fn next_number(&self, series_id: &str, year: i32) -> RepoResult<i64>;
}

pub struct SqliteSeriesRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteSeriesRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl SeriesRepository for SqliteSeriesRepository<'_> {
    fn create_series(&self, series: &MessageSeries) -> RepoResult<()> {
        series.validate()?;
        self.conn
            .execute(
                "INSERT INTO message_series (
                    series_id,
                    main_type,
                    mrn_format,
                    short_format,
                    number_sequence_type
                ) VALUES (?1, ?2, ?3, ?4, ?5);",
                params![
                    series.series_id.trim(),
                    series.main_type.as_str(),
                    series.mrn_format.trim(),
                    series.short_format.as_deref(),
                    series.number_sequence_type.as_str(),
                ],
            )
            .map_err(|err| map_constraint_error(err, format!("series {}", series.series_id)))?;
        Ok(())
    }

    fn update_series(&self, series: &MessageSeries) -> RepoResult<()> {
        series.validate()?;
        let changed = self
            .conn
            .execute(
                "UPDATE message_series
                 SET
                    main_type = ?2,
                    mrn_format = ?3,
                    short_format = ?4,
                    number_sequence_type = ?5
                 WHERE series_id = ?1;",
                params![
                    series.series_id.trim(),
                    series.main_type.as_str(),
                    series.mrn_format.trim(),
                    series.short_format.as_deref(),
                    series.number_sequence_type.as_str(),
                ],
            )
            .map_err(|err| map_constraint_error(err, format!("series {}", series.series_id)))?;
        if changed == 0 {
            return Err(RepoError::SeriesNotFound(series.series_id.clone()));
        }
        Ok(())
    }

    fn get_series(&self, series_id: &str) -> RepoResult<Option<MessageSeries>> {
        let mut stmt = self.conn.prepare(
            "SELECT series_id, main_type, mrn_format, short_format, number_sequence_type
             FROM message_series
             WHERE series_id = ?1;",
        )?;
        let mut rows = stmt.query([series_id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_series_row(row)?));
        }
        Ok(None)
    }

    fn list_series(&self) -> RepoResult<Vec<MessageSeries>> {
        let mut stmt = self.conn.prepare(
            "SELECT series_id, main_type, mrn_format, short_format, number_sequence_type
             FROM message_series
             ORDER BY series_id ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut series = Vec::new();
        while let Some(row) = rows.next()? {
            series.push(parse_series_row(row)?);
        }
        Ok(series)
    }

    fn next_number(&self, series_id: &str, year: i32) -> RepoResult<i64> {
        allocate_number(self.conn, series_id, year)
    }
}

/// Allocates the next number on `conn`, joining any open transaction.
pub(crate) fn allocate_number(conn: &Connection, series_id: &str, year: i32) -> RepoResult<i64> {
    let sequence_type = conn
        .query_row(
            "SELECT number_sequence_type FROM message_series WHERE series_id = ?1;",
            [series_id],
            |row| row.get::<_, String>(0),
        )
        .optional()?
        .ok_or_else(|| RepoError::SeriesNotFound(series_id.to_string()))?;

    let key_year = match NumberSequenceType::parse(&sequence_type) {
        Some(NumberSequenceType::Continuous) => CONTINUOUS_SEQUENCE_YEAR,
        Some(_) => year,
        None => {
            return Err(RepoError::InvalidData(format!(
                "invalid number sequence type `{sequence_type}` for series {series_id}"
            )))
        }
    };

    let number = conn.query_row(
        "INSERT INTO message_series_numbers (series_id, year, last_number)
         VALUES (?1, ?2, 1)
         ON CONFLICT (series_id, year) DO UPDATE SET last_number = last_number + 1
         RETURNING last_number;",
        params![series_id, key_year],
        |row| row.get::<_, i64>(0),
    )?;
    Ok(number)
}

fn parse_series_row(row: &Row<'_>) -> RepoResult<MessageSeries> {
    let series_id: String = row.get("series_id")?;

    let main_type_text: String = row.get("main_type")?;
    let main_type = MainType::parse(&main_type_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid main type `{main_type_text}` for series {series_id}"
        ))
    })?;

    let sequence_text: String = row.get("number_sequence_type")?;
    let number_sequence_type = NumberSequenceType::parse(&sequence_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid number sequence type `{sequence_text}` for series {series_id}"
        ))
    })?;

    Ok(MessageSeries {
        series_id,
        main_type,
        mrn_format: row.get("mrn_format")?,
        short_format: row.get("short_format")?,
        number_sequence_type,
    })
}
