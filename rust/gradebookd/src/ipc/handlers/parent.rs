//! Read-only parent portal. A parent only ever sees their own children, and
//! only published term reports.

use crate::context;
use crate::error::CoreError;
use crate::fees;
use crate::ipc::handlers::reports::{report_detail, student_published_reports};
use crate::ipc::helpers::{get_required_str, with_db, HandlerErr, HandlerResult};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

const ATTENDANCE_LIMIT: i64 = 30;

fn require_parent(conn: &Connection, parent_id: &str) -> Result<(), HandlerErr> {
    let exists = conn
        .query_row("SELECT 1 FROM parents WHERE id = ?", [parent_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if !exists {
        return Err(CoreError::not_found("parent", parent_id).into());
    }
    Ok(())
}

fn require_child(conn: &Connection, params: &serde_json::Value) -> Result<String, HandlerErr> {
    let parent_id = get_required_str(params, "parentId")?;
    let student_id = get_required_str(params, "studentId")?;
    require_parent(conn, &parent_id)?;
    let owner: Option<Option<String>> = conn
        .query_row(
            "SELECT parent_id FROM students WHERE id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .optional()?;
    match owner {
        None => Err(CoreError::not_found("student", student_id).into()),
        Some(Some(p)) if p == parent_id => Ok(student_id),
        Some(_) => Err(HandlerErr::new("forbidden", "student is not linked to this parent")),
    }
}

fn parent_children(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let parent_id = get_required_str(params, "parentId")?;
    require_parent(conn, &parent_id)?;
    let ctx = context::resolve_current(conn)?;
    let year_id = ctx.as_ref().map(|c| c.academic_year_id.clone());
    let term_id = ctx.as_ref().map(|c| c.term.id.clone());

    let mut stmt = conn.prepare(
        "SELECT s.id, s.first_name, s.last_name, c.id, c.name, c.level,
                (SELECT i.balance FROM fee_invoices i
                 WHERE i.student_id = s.id AND i.term_id = ?2)
         FROM students s
         LEFT JOIN enrollments e ON e.student_id = s.id AND e.academic_year_id = ?1
         LEFT JOIN classes c ON c.id = e.class_id
         WHERE s.parent_id = ?3
         ORDER BY s.last_name, s.first_name",
    )?;
    let children = stmt
        .query_map((year_id.as_deref(), term_id.as_deref(), &parent_id), |r| {
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "firstName": r.get::<_, String>(1)?,
                "lastName": r.get::<_, String>(2)?,
                "classId": r.get::<_, Option<String>>(3)?,
                "className": r.get::<_, Option<String>>(4)?,
                "classLevel": r.get::<_, Option<String>>(5)?,
                "currentBalance": r.get::<_, Option<i64>>(6)?.unwrap_or(0),
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "children": children }))
}

fn parent_reports(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let student_id = require_child(conn, params)?;
    Ok(json!({ "reports": student_published_reports(conn, &student_id)? }))
}

fn parent_report(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let student_id = require_child(conn, params)?;
    let term_id = get_required_str(params, "termId")?;
    let Some(report) = report_detail(conn, &student_id, &term_id)? else {
        return Err(
            CoreError::not_found("term report", format!("{}/{}", student_id, term_id)).into(),
        );
    };
    if report.get("isPublished").and_then(|v| v.as_bool()) != Some(true) {
        return Err(CoreError::InvalidState("term report is not published".to_string()).into());
    }
    Ok(report)
}

fn parent_fees(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let student_id = require_child(conn, params)?;
    let invoices = fees::student_invoices(conn, &student_id)?;
    let outstanding: i64 = invoices.iter().map(|i| i.balance).sum();
    Ok(json!({ "invoices": invoices, "totalOutstanding": outstanding }))
}

fn parent_attendance(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let student_id = require_child(conn, params)?;
    let mut stmt = conn.prepare(
        "SELECT date, status FROM attendance WHERE student_id = ? ORDER BY date DESC LIMIT ?",
    )?;
    let records = stmt
        .query_map((&student_id, ATTENDANCE_LIMIT), |r| {
            Ok(json!({
                "date": r.get::<_, String>(0)?,
                "status": r.get::<_, String>(1)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "records": records }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: fn(&Connection, &serde_json::Value) -> HandlerResult = match req.method.as_str() {
        "parent.children" => parent_children,
        "parent.reports" => parent_reports,
        "parent.report" => parent_report,
        "parent.fees" => parent_fees,
        "parent.attendance" => parent_attendance,
        _ => return None,
    };
    Some(with_db(state, req, handler))
}
