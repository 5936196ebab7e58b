use crate::calc::{competition_rank, round_hundredths};
use crate::context::{AcademicContext, TermInfo};
use crate::db;
use crate::error::{CoreError, CoreResult};
use crate::store::{AttendanceTally, TermReportDraft, TermReportStore};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateOutcome {
    pub generated_count: usize,
}

/// PRESENT and LATE both count as present; EXCUSED counts toward the total
/// only.
pub fn tally_attendance<'a, I>(statuses: I) -> AttendanceTally
where
    I: IntoIterator<Item = &'a str>,
{
    let mut tally = AttendanceTally::default();
    for status in statuses {
        tally.total_days += 1;
        match status.to_ascii_lowercase().as_str() {
            "present" | "late" => tally.days_present += 1,
            "absent" => tally.days_absent += 1,
            _ => {}
        }
    }
    tally
}

/// Inclusive attendance window `[term start, min(term end, today)]`.
pub fn attendance_window(term: &TermInfo, today: NaiveDate) -> (String, String) {
    let today = today.format("%Y-%m-%d").to_string();
    let end = if today < term.end_date {
        today
    } else {
        term.end_date.clone()
    };
    (term.start_date.clone(), end)
}

pub fn generate_term_reports(
    conn: &Connection,
    ctx: &AcademicContext,
    class_id: &str,
    term_id: &str,
    actor_id: &str,
    today: NaiveDate,
) -> CoreResult<GenerateOutcome> {
    let tx = db::write_tx(conn)?;
    let outcome = aggregate_cohort(&*tx, ctx, class_id, term_id, today)?;
    tx.commit()?;

    info!(
        target: "reports",
        actor = %actor_id,
        class = %class_id,
        term = %term_id,
        generated = outcome.generated_count,
        "term reports generated"
    );
    Ok(outcome)
}

pub fn aggregate_cohort<S: TermReportStore + ?Sized>(
    store: &S,
    ctx: &AcademicContext,
    class_id: &str,
    term_id: &str,
    today: NaiveDate,
) -> CoreResult<GenerateOutcome> {
    if !store.class_exists(class_id)? {
        return Err(CoreError::not_found("class", class_id));
    }
    ctx.require_term(term_id)?;

    let enrollments = store.class_enrollments(class_id, &ctx.academic_year_id)?;
    let class_size = enrollments.len() as i64;
    let (from, to) = attendance_window(&ctx.term, today);
    let stamp = db::now_stamp();

    for enrollment in &enrollments {
        let totals = store.subject_totals(&enrollment.student_id, class_id, term_id)?;
        let (total_marks, average_score, size) = if totals.is_empty() {
            (None, None, None)
        } else {
            let sum = round_hundredths(totals.iter().map(|t| t.unwrap_or(0.0)).sum());
            (
                Some(sum),
                Some(sum / totals.len() as f64),
                Some(class_size),
            )
        };

        let statuses = store.attendance_statuses(&enrollment.student_id, class_id, &from, &to)?;
        let draft = TermReportDraft {
            student_id: &enrollment.student_id,
            term_id,
            enrollment_id: &enrollment.enrollment_id,
            class_id,
            total_marks,
            average_score,
            class_size: size,
            attendance: tally_attendance(statuses.iter().map(String::as_str)),
        };
        store.create_or_update_term_report(&draft, &stamp)?;
    }

    rerank_term_reports(store, class_id, term_id)?;

    Ok(GenerateOutcome {
        generated_count: enrollments.len(),
    })
}

/// Recomputes `position` across the (class, term) report cohort.
pub fn rerank_term_reports<S: TermReportStore + ?Sized>(
    store: &S,
    class_id: &str,
    term_id: &str,
) -> CoreResult<()> {
    let cohort = store.cohort_averages(class_id, term_id)?;
    let positions = competition_rank(&cohort);
    for (id, _) in &cohort {
        store.set_report_position(id, positions.get(id).copied())?;
    }
    Ok(())
}

/// Makes the cohort visible to parents. Re-publishing refreshes the stamp.
pub fn publish_term_reports(
    conn: &Connection,
    class_id: &str,
    term_id: &str,
    actor_id: &str,
) -> CoreResult<usize> {
    set_publication(conn, class_id, term_id, actor_id, true)
}

pub fn unpublish_term_reports(
    conn: &Connection,
    class_id: &str,
    term_id: &str,
    actor_id: &str,
) -> CoreResult<usize> {
    set_publication(conn, class_id, term_id, actor_id, false)
}

fn set_publication(
    conn: &Connection,
    class_id: &str,
    term_id: &str,
    actor_id: &str,
    publish: bool,
) -> CoreResult<usize> {
    let tx = db::write_tx(conn)?;
    if tx.cohort_averages(class_id, term_id)?.is_empty() {
        return Err(CoreError::InvalidState(
            "no term reports have been generated for this class and term".to_string(),
        ));
    }
    let stamp = db::now_stamp();
    let n = tx.set_cohort_published(class_id, term_id, publish.then_some(stamp.as_str()))?;
    tx.commit()?;

    info!(
        target: "reports",
        actor = %actor_id,
        class = %class_id,
        term = %term_id,
        count = n,
        published = publish,
        "term report publication changed"
    );
    Ok(n)
}
