use crate::context;
use crate::error::CoreError;
use crate::ipc::auth::{self, Capability};
use crate::ipc::handlers::assessments::subject_lines;
use crate::ipc::helpers::{get_required_str, today, with_db, HandlerErr, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::reports;
use crate::store::TermReportStore;
use rusqlite::{types::Value, Connection, OptionalExtension, Row};
use serde_json::json;
use tracing::info;

const REPORT_SELECT: &str = "SELECT r.id, r.student_id, st.last_name || ', ' || st.first_name,
        r.term_id, t.name, r.class_id, c.name, r.total_marks, r.average_score,
        r.class_position, r.class_size, r.total_days, r.days_present, r.days_absent,
        r.class_teacher_remarks, r.head_remarks, r.conduct, r.attitude, r.interest,
        r.promotion_status, r.next_term_begins, r.is_published, r.published_at, r.generated_at
     FROM term_reports r
     JOIN students st ON st.id = r.student_id
     JOIN terms t ON t.id = r.term_id
     JOIN classes c ON c.id = r.class_id";

pub fn report_row_json(r: &Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "studentId": r.get::<_, String>(1)?,
        "studentName": r.get::<_, String>(2)?,
        "termId": r.get::<_, String>(3)?,
        "termName": r.get::<_, String>(4)?,
        "classId": r.get::<_, String>(5)?,
        "className": r.get::<_, String>(6)?,
        "totalMarks": r.get::<_, Option<f64>>(7)?,
        "averageScore": r.get::<_, Option<f64>>(8)?,
        "classPosition": r.get::<_, Option<i64>>(9)?,
        "classSize": r.get::<_, Option<i64>>(10)?,
        "totalDays": r.get::<_, i64>(11)?,
        "daysPresent": r.get::<_, i64>(12)?,
        "daysAbsent": r.get::<_, i64>(13)?,
        "classTeacherRemarks": r.get::<_, Option<String>>(14)?,
        "headRemarks": r.get::<_, Option<String>>(15)?,
        "conduct": r.get::<_, Option<String>>(16)?,
        "attitude": r.get::<_, Option<String>>(17)?,
        "interest": r.get::<_, Option<String>>(18)?,
        "promotionStatus": r.get::<_, Option<String>>(19)?,
        "nextTermBegins": r.get::<_, Option<String>>(20)?,
        "isPublished": r.get::<_, i64>(21)? != 0,
        "publishedAt": r.get::<_, Option<String>>(22)?,
        "generatedAt": r.get::<_, String>(23)?,
    }))
}

/// One report with its subject lines, or `None` when not generated yet.
pub fn report_detail(
    conn: &Connection,
    student_id: &str,
    term_id: &str,
) -> Result<Option<serde_json::Value>, HandlerErr> {
    let sql = format!("{} WHERE r.student_id = ? AND r.term_id = ?", REPORT_SELECT);
    let report = conn
        .query_row(&sql, (student_id, term_id), report_row_json)
        .optional()?;
    let Some(mut report) = report else {
        return Ok(None);
    };
    report["subjects"] = json!(subject_lines(conn, student_id, term_id)?);
    Ok(Some(report))
}

pub fn student_published_reports(
    conn: &Connection,
    student_id: &str,
) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let sql = format!(
        "{} WHERE r.student_id = ? AND r.is_published = 1 ORDER BY t.start_date DESC",
        REPORT_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([student_id], report_row_json)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn cohort_params(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<(String, String, String), HandlerErr> {
    let actor_id = get_required_str(params, "actorId")?;
    let class_id = get_required_str(params, "classId")?;
    let term_id = get_required_str(params, "termId")?;
    auth::authorize(conn, &actor_id, Capability::ClassRecords { class_id: &class_id })?;
    Ok((actor_id, class_id, term_id))
}

fn term_reports_generate(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let (actor_id, class_id, term_id) = cohort_params(conn, params)?;
    let ctx = context::require_current(conn)?;
    let day = today(params)?;
    let outcome = reports::generate_term_reports(conn, &ctx, &class_id, &term_id, &actor_id, day)?;
    Ok(json!(outcome))
}

fn term_reports_publish(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let (actor_id, class_id, term_id) = cohort_params(conn, params)?;
    let count = reports::publish_term_reports(conn, &class_id, &term_id, &actor_id)?;
    Ok(json!({ "publishedCount": count }))
}

fn term_reports_unpublish(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let (actor_id, class_id, term_id) = cohort_params(conn, params)?;
    let count = reports::unpublish_term_reports(conn, &class_id, &term_id, &actor_id)?;
    Ok(json!({ "unpublishedCount": count }))
}

fn term_reports_list(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let class_id = get_required_str(params, "classId")?;
    let term_id = get_required_str(params, "termId")?;
    if !conn.class_exists(&class_id)? {
        return Err(CoreError::not_found("class", class_id).into());
    }
    let sql = format!(
        "{} WHERE r.class_id = ? AND r.term_id = ?
         ORDER BY r.class_position IS NULL, r.class_position, st.last_name, st.first_name",
        REPORT_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map((&class_id, &term_id), report_row_json)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "reports": rows }))
}

/// Staff-editable fields. Aggregates, attendance and publication are owned by
/// generation and publishing.
const EDITABLE: [(&str, &str); 7] = [
    ("classTeacherRemarks", "class_teacher_remarks"),
    ("headRemarks", "head_remarks"),
    ("conduct", "conduct"),
    ("attitude", "attitude"),
    ("interest", "interest"),
    ("promotionStatus", "promotion_status"),
    ("nextTermBegins", "next_term_begins"),
];

fn term_reports_update(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let actor_id = get_required_str(params, "actorId")?;
    let student_id = get_required_str(params, "studentId")?;
    let term_id = get_required_str(params, "termId")?;

    let found: Option<(String, String)> = conn
        .query_row(
            "SELECT id, class_id FROM term_reports WHERE student_id = ? AND term_id = ?",
            (&student_id, &term_id),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((report_id, class_id)) = found else {
        return Err(
            CoreError::not_found("term report", format!("{}/{}", student_id, term_id)).into(),
        );
    };
    auth::authorize(conn, &actor_id, Capability::ClassRecords { class_id: &class_id })?;

    let mut sets: Vec<String> = Vec::new();
    let mut values: Vec<Value> = Vec::new();
    for (key, column) in EDITABLE {
        let Some(v) = params.get(key) else {
            continue;
        };
        let value = match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::String(s) if s.trim().is_empty() => Value::Null,
            serde_json::Value::String(s) => Value::Text(s.trim().to_string()),
            _ => {
                return Err(HandlerErr::bad_params(format!("{} must be a string or null", key)));
            }
        };
        sets.push(format!("{} = ?", column));
        values.push(value);
    }
    if sets.is_empty() {
        return Err(HandlerErr::bad_params("no editable fields supplied"));
    }
    values.push(Value::Text(report_id.clone()));
    let sql = format!("UPDATE term_reports SET {} WHERE id = ?", sets.join(", "));
    conn.execute(&sql, rusqlite::params_from_iter(values))?;

    info!(
        target: "reports",
        actor = %actor_id,
        report = %report_id,
        fields = sets.len(),
        "term report updated"
    );
    Ok(json!({ "ok": true, "updatedFields": sets.len() }))
}

fn term_reports_get(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let student_id = get_required_str(params, "studentId")?;
    let term_id = get_required_str(params, "termId")?;
    match report_detail(conn, &student_id, &term_id)? {
        Some(report) => Ok(report),
        None => Err(
            CoreError::not_found("term report", format!("{}/{}", student_id, term_id)).into(),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: fn(&Connection, &serde_json::Value) -> HandlerResult = match req.method.as_str() {
        "termReports.generate" => term_reports_generate,
        "termReports.publish" => term_reports_publish,
        "termReports.unpublish" => term_reports_unpublish,
        "termReports.list" => term_reports_list,
        "termReports.update" => term_reports_update,
        "termReports.get" => term_reports_get,
        _ => return None,
    };
    Some(with_db(state, req, handler))
}
