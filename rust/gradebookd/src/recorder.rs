use crate::calc::{competition_rank, Components, RawComponents};
use crate::context::AcademicContext;
use crate::db;
use crate::error::{CoreError, CoreResult};
use crate::grading::{GradingScales, SchoolLevel};
use crate::reports::rerank_term_reports;
use crate::store::{AssessmentKey, AssessmentStore};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreEntry {
    pub student_id: Option<String>,
    #[serde(flatten)]
    pub raw: RawComponents,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordOutcome {
    pub saved_count: usize,
    pub cohort_size: usize,
}

/// Upserts a batch of component scores, regrades each touched row and then
/// re-ranks the complete (offering, term) cohort, all in one write transaction.
pub fn record_scores(
    conn: &Connection,
    ctx: &AcademicContext,
    scales: &GradingScales,
    offering_id: &str,
    term_id: &str,
    actor_id: &str,
    entries: &[ScoreEntry],
) -> CoreResult<RecordOutcome> {
    let tx = db::write_tx(conn)?;
    let outcome = apply_scores(&*tx, ctx, scales, offering_id, term_id, actor_id, entries)?;
    tx.commit()?;

    info!(
        target: "scores",
        actor = %actor_id,
        offering = %offering_id,
        term = %term_id,
        saved = outcome.saved_count,
        cohort = outcome.cohort_size,
        "scores recorded"
    );
    Ok(outcome)
}

pub fn apply_scores<S: AssessmentStore + ?Sized>(
    store: &S,
    ctx: &AcademicContext,
    scales: &GradingScales,
    offering_id: &str,
    term_id: &str,
    actor_id: &str,
    entries: &[ScoreEntry],
) -> CoreResult<RecordOutcome> {
    if offering_id.trim().is_empty() {
        return Err(CoreError::validation("missing offeringId"));
    }
    if actor_id.trim().is_empty() {
        return Err(CoreError::validation("missing actorId"));
    }
    let offering = store
        .find_offering(offering_id)?
        .ok_or_else(|| CoreError::not_found("subject offering", offering_id))?;
    ctx.require_term(term_id)?;

    let level = SchoolLevel::normalize(Some(&offering.class_level));
    let Some(scale) = scales.level(level) else {
        return Err(CoreError::Config(format!("no scale for {}", level.as_str())));
    };

    let mut seen: HashSet<&str> = HashSet::new();
    let mut touched: Vec<(String, Components)> = Vec::with_capacity(entries.len());
    let stamp = db::now_stamp();

    for (i, entry) in entries.iter().enumerate() {
        let student_id = entry
            .student_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CoreError::Validation {
                message: "entry is missing studentId".to_string(),
                details: Some(serde_json::json!({ "index": i })),
            })?;
        if !seen.insert(student_id) {
            return Err(CoreError::Validation {
                message: "student appears twice in one batch".to_string(),
                details: Some(serde_json::json!({ "index": i, "studentId": student_id })),
            });
        }
        if !store.student_exists(student_id)? {
            return Err(CoreError::not_found("student", student_id));
        }

        let components = Components::clamped(&entry.raw);
        let key = AssessmentKey {
            student_id,
            offering_id: &offering.id,
            term_id,
        };
        let id = store.create_or_update_assessment(key, &components, actor_id, &stamp)?;
        touched.push((id, components));
    }

    for (id, components) in &touched {
        let total = components.total();
        store.set_assessment_grade(id, total, scale.grade(total))?;
    }

    let cohort_size = rerank_assessments(store, &offering.id, term_id)?;

    Ok(RecordOutcome {
        saved_count: touched.len(),
        cohort_size,
    })
}

/// Recomputes `class_position` for every assessment of the (offering, term)
/// cohort. Returns the cohort size.
pub fn rerank_assessments<S: AssessmentStore + ?Sized>(
    store: &S,
    offering_id: &str,
    term_id: &str,
) -> CoreResult<usize> {
    let cohort = store.cohort_totals(offering_id, term_id)?;
    let positions = competition_rank(&cohort);
    for (id, _) in &cohort {
        store.set_assessment_position(id, positions.get(id).copied())?;
    }
    Ok(cohort.len())
}

/// Deletes a student with everything hanging off them, then re-ranks the
/// score and term report cohorts they belonged to so nobody keeps a gap.
pub fn remove_student(conn: &Connection, student_id: &str) -> CoreResult<()> {
    let tx = db::write_tx(conn)?;
    let assessment_cohorts: Vec<(String, String)> = {
        let mut stmt = tx.prepare(
            "SELECT DISTINCT offering_id, term_id FROM assessments WHERE student_id = ?",
        )?;
        let rows = stmt
            .query_map([student_id], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };
    let report_cohorts: Vec<(String, String)> = {
        let mut stmt = tx.prepare(
            "SELECT DISTINCT class_id, term_id FROM term_reports WHERE student_id = ?",
        )?;
        let rows = stmt
            .query_map([student_id], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    if tx.execute("DELETE FROM students WHERE id = ?", [student_id])? == 0 {
        return Err(CoreError::not_found("student", student_id));
    }
    for (offering_id, term_id) in &assessment_cohorts {
        rerank_assessments(&*tx, offering_id, term_id)?;
    }
    for (class_id, term_id) in &report_cohorts {
        rerank_term_reports(&*tx, class_id, term_id)?;
    }
    tx.commit()?;

    info!(
        target: "scores",
        student = %student_id,
        score_cohorts = assessment_cohorts.len(),
        report_cohorts = report_cohorts.len(),
        "student removed"
    );
    Ok(())
}
