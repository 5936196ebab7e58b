use crate::error::{CoreError, CoreResult};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermInfo {
    pub id: String,
    pub name: String,
    pub term_number: i64,
    pub start_date: String,
    pub end_date: String,
}

/// The active academic year and term, resolved once by the caller and passed
/// into every core operation that needs it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcademicContext {
    pub academic_year_id: String,
    pub academic_year_name: String,
    pub term: TermInfo,
}

impl AcademicContext {
    /// `InvalidState` unless `term_id` is the active term.
    pub fn require_term(&self, term_id: &str) -> CoreResult<()> {
        if self.term.id != term_id {
            return Err(CoreError::InvalidState(format!(
                "term {} is not the active term",
                term_id
            )));
        }
        Ok(())
    }
}

pub fn resolve_current(conn: &Connection) -> CoreResult<Option<AcademicContext>> {
    let row = conn
        .query_row(
            "SELECT y.id, y.name, t.id, t.name, t.term_number, t.start_date, t.end_date
             FROM academic_years y
             JOIN terms t ON t.academic_year_id = y.id
             WHERE y.is_current = 1 AND t.is_current = 1
             ORDER BY t.term_number DESC
             LIMIT 1",
            [],
            |r| {
                Ok(AcademicContext {
                    academic_year_id: r.get(0)?,
                    academic_year_name: r.get(1)?,
                    term: TermInfo {
                        id: r.get(2)?,
                        name: r.get(3)?,
                        term_number: r.get(4)?,
                        start_date: r.get(5)?,
                        end_date: r.get(6)?,
                    },
                })
            },
        )
        .optional()?;
    Ok(row)
}

/// Absence of an active term is a precondition failure, never a default.
pub fn require_current(conn: &Connection) -> CoreResult<AcademicContext> {
    resolve_current(conn)?
        .ok_or_else(|| CoreError::InvalidState("no active academic term".to_string()))
}

pub fn load_term(conn: &Connection, term_id: &str) -> CoreResult<TermInfo> {
    conn.query_row(
        "SELECT id, name, term_number, start_date, end_date FROM terms WHERE id = ?",
        [term_id],
        |r| {
            Ok(TermInfo {
                id: r.get(0)?,
                name: r.get(1)?,
                term_number: r.get(2)?,
                start_date: r.get(3)?,
                end_date: r.get(4)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| CoreError::not_found("term", term_id))
}
