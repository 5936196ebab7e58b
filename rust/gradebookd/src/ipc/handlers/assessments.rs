use crate::calc::round_off_1_decimal;
use crate::context;
use crate::error::CoreError;
use crate::grading::{GradingScales, SchoolLevel};
use crate::ipc::auth::{self, Capability};
use crate::ipc::helpers::{
    from_params, get_optional_str, get_required_str, with_db, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::recorder::{self, ScoreEntry};
use crate::store::{AssessmentKey, AssessmentStore};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use tracing::info;

/// Subject lines of one student for one term, ordered by subject name.
pub fn subject_lines(
    conn: &Connection,
    student_id: &str,
    term_id: &str,
) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT a.id, o.id, s.name, s.code, a.classwork, a.homework, a.project, a.exam,
                a.total_score, a.grade, a.grade_remark, a.class_position, a.teacher_remarks
         FROM assessments a
         JOIN subject_offerings o ON o.id = a.offering_id
         JOIN subjects s ON s.id = o.subject_id
         WHERE a.student_id = ? AND a.term_id = ?
         ORDER BY s.name",
    )?;
    let rows = stmt
        .query_map((student_id, term_id), |r| {
            Ok(json!({
                "assessmentId": r.get::<_, String>(0)?,
                "offeringId": r.get::<_, String>(1)?,
                "subjectName": r.get::<_, String>(2)?,
                "subjectCode": r.get::<_, Option<String>>(3)?,
                "classwork": r.get::<_, f64>(4)?,
                "homework": r.get::<_, f64>(5)?,
                "project": r.get::<_, f64>(6)?,
                "exam": r.get::<_, f64>(7)?,
                "totalScore": r.get::<_, Option<f64>>(8)?,
                "grade": r.get::<_, Option<String>>(9)?,
                "gradeRemark": r.get::<_, Option<String>>(10)?,
                "classPosition": r.get::<_, Option<i64>>(11)?,
                "teacherRemarks": r.get::<_, Option<String>>(12)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Class of the student in the academic year that owns `term_id`.
fn class_for_term(
    conn: &Connection,
    student_id: &str,
    term_id: &str,
) -> Result<Option<(String, String, String)>, HandlerErr> {
    Ok(conn
        .query_row(
            "SELECT c.id, c.name, c.level
             FROM enrollments e
             JOIN classes c ON c.id = e.class_id
             WHERE e.student_id = ?
               AND e.academic_year_id = (SELECT academic_year_id FROM terms WHERE id = ?)",
            (student_id, term_id),
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?)
}

fn scores_record(
    conn: &Connection,
    scales: &GradingScales,
    params: &serde_json::Value,
) -> HandlerResult {
    let actor_id = get_required_str(params, "actorId")?;
    let offering_id = get_required_str(params, "offeringId")?;
    let term_id = get_required_str(params, "termId")?;
    let entries: Vec<ScoreEntry> = from_params(params, "entries")?;

    auth::authorize(conn, &actor_id, Capability::Scores { offering_id: &offering_id })?;
    let ctx = context::require_current(conn)?;
    let outcome =
        recorder::record_scores(conn, &ctx, scales, &offering_id, &term_id, &actor_id, &entries)?;
    Ok(json!(outcome))
}

fn scores_list(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let offering_id = get_required_str(params, "offeringId")?;
    let term_id = get_required_str(params, "termId")?;
    if conn.find_offering(&offering_id)?.is_none() {
        return Err(CoreError::not_found("subject offering", offering_id).into());
    }
    let mut stmt = conn.prepare(
        "SELECT a.id, a.student_id, st.last_name || ', ' || st.first_name,
                a.classwork, a.homework, a.project, a.exam, a.total_score,
                a.grade, a.grade_remark, a.class_position, a.teacher_remarks, a.updated_at
         FROM assessments a
         JOIN students st ON st.id = a.student_id
         WHERE a.offering_id = ? AND a.term_id = ?
         ORDER BY a.class_position IS NULL, a.class_position, st.last_name, st.first_name",
    )?;
    let rows = stmt
        .query_map((&offering_id, &term_id), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentId": r.get::<_, String>(1)?,
                "studentName": r.get::<_, String>(2)?,
                "classwork": r.get::<_, f64>(3)?,
                "homework": r.get::<_, f64>(4)?,
                "project": r.get::<_, f64>(5)?,
                "exam": r.get::<_, f64>(6)?,
                "totalScore": r.get::<_, Option<f64>>(7)?,
                "grade": r.get::<_, Option<String>>(8)?,
                "gradeRemark": r.get::<_, Option<String>>(9)?,
                "classPosition": r.get::<_, Option<i64>>(10)?,
                "teacherRemarks": r.get::<_, Option<String>>(11)?,
                "updatedAt": r.get::<_, String>(12)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "assessments": rows }))
}

fn scores_set_remark(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let actor_id = get_required_str(params, "actorId")?;
    let offering_id = get_required_str(params, "offeringId")?;
    let term_id = get_required_str(params, "termId")?;
    let student_id = get_required_str(params, "studentId")?;
    let remark = get_optional_str(params, "remark");

    auth::authorize(conn, &actor_id, Capability::Scores { offering_id: &offering_id })?;
    let key = AssessmentKey {
        student_id: &student_id,
        offering_id: &offering_id,
        term_id: &term_id,
    };
    let Some(existing) = conn.find_assessment(key)? else {
        return Err(
            CoreError::not_found("assessment", format!("{}/{}", offering_id, student_id)).into(),
        );
    };
    conn.execute(
        "UPDATE assessments SET teacher_remarks = ?, updated_at = ? WHERE id = ?",
        (remark.as_deref(), crate::db::now_stamp(), &existing.id),
    )?;
    info!(target: "scores", actor = %actor_id, assessment = %existing.id, "remark updated");
    Ok(json!({ "ok": true }))
}

/// Every subject of a student for a term, with the overall figures graded on
/// the student's own class level.
fn assessments_student(
    conn: &Connection,
    scales: &GradingScales,
    params: &serde_json::Value,
) -> HandlerResult {
    let student_id = get_required_str(params, "studentId")?;
    let term_id = match get_optional_str(params, "termId") {
        Some(t) => t,
        None => context::require_current(conn)?.term.id,
    };
    if !conn.student_exists(&student_id)? {
        return Err(CoreError::not_found("student", student_id).into());
    }
    let term = context::load_term(conn, &term_id)?;

    let subjects = subject_lines(conn, &student_id, &term_id)?;
    let totals: Vec<f64> = subjects
        .iter()
        .filter_map(|s| s.get("totalScore").and_then(|v| v.as_f64()))
        .collect();
    let class = class_for_term(conn, &student_id, &term_id)?;
    let level = SchoolLevel::normalize(class.as_ref().map(|(_, _, level)| level.as_str()));

    let (total, average, grade) = if totals.is_empty() {
        (None, None, None)
    } else {
        let sum: f64 = totals.iter().sum();
        let avg = sum / totals.len() as f64;
        let band = scales.grade(avg, level);
        (Some(round_off_1_decimal(sum)), Some(round_off_1_decimal(avg)), band)
    };
    let position: Option<i64> = conn
        .query_row(
            "SELECT class_position FROM term_reports WHERE student_id = ? AND term_id = ?",
            (&student_id, &term_id),
            |r| r.get(0),
        )
        .optional()?
        .flatten();

    Ok(json!({
        "studentId": student_id,
        "term": term,
        "classId": class.as_ref().map(|(id, _, _)| id.clone()),
        "className": class.as_ref().map(|(_, name, _)| name.clone()),
        "level": level.as_str(),
        "subjects": subjects,
        "subjectCount": totals.len(),
        "totalScore": total,
        "averageScore": average,
        "overallGrade": grade.map(|b| b.code.clone()),
        "overallRemark": grade.map(|b| b.remark.clone()),
        "position": position,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let scales = &state.scales;
    match req.method.as_str() {
        "scores.record" => Some(with_db(state, req, |conn, p| scores_record(conn, scales, p))),
        "scores.list" => Some(with_db(state, req, scores_list)),
        "scores.setRemark" => Some(with_db(state, req, scores_set_remark)),
        "assessments.student" => {
            Some(with_db(state, req, |conn, p| assessments_student(conn, scales, p)))
        }
        _ => None,
    }
}
