use crate::context;
use crate::db;
use crate::error::CoreError;
use crate::grading::SchoolLevel;
use crate::ipc::auth::{self, Capability, Role};
use crate::ipc::helpers::{
    get_optional_str, get_required_date, get_required_i64, get_required_str, new_id, with_db,
    HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::recorder;
use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use tracing::info;

const ATTENDANCE_STATUSES: [&str; 4] = ["present", "absent", "late", "excused"];

fn row_exists(conn: &Connection, table: &str, id: &str) -> Result<bool, HandlerErr> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    Ok(conn
        .query_row(&sql, [id], |r| r.get::<_, i64>(0))
        .optional()?
        .is_some())
}

fn require_row(
    conn: &Connection,
    table: &str,
    what: &'static str,
    id: &str,
) -> Result<(), HandlerErr> {
    if !row_exists(conn, table, id)? {
        return Err(CoreError::not_found(what, id).into());
    }
    Ok(())
}

fn staff_create(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let first_name = get_required_str(params, "firstName")?;
    let last_name = get_required_str(params, "lastName")?;
    let role_raw = get_required_str(params, "role")?;
    let Some(role) = Role::parse(&role_raw) else {
        return Err(HandlerErr::bad_params(
            "role must be admin, headteacher, teacher or accounts",
        ));
    };
    let staff_id = new_id();
    conn.execute(
        "INSERT INTO staff(id, first_name, last_name, role, created_at) VALUES(?, ?, ?, ?, ?)",
        (&staff_id, &first_name, &last_name, role.as_str(), db::now_stamp()),
    )?;
    Ok(json!({ "staffId": staff_id }))
}

fn parents_create(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let name = get_required_str(params, "name")?;
    let phone = get_optional_str(params, "phone");
    let parent_id = new_id();
    conn.execute(
        "INSERT INTO parents(id, name, phone) VALUES(?, ?, ?)",
        (&parent_id, &name, phone.as_deref()),
    )?;
    Ok(json!({ "parentId": parent_id }))
}

fn classes_create(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let name = get_required_str(params, "name")?;
    let level = get_required_str(params, "level")?;
    let class_teacher_id = get_optional_str(params, "classTeacherId");
    if let Some(t) = class_teacher_id.as_deref() {
        require_row(conn, "staff", "staff", t)?;
    }
    let class_id = new_id();
    conn.execute(
        "INSERT INTO classes(id, name, level, class_teacher_id) VALUES(?, ?, ?, ?)",
        (&class_id, &name, &level, class_teacher_id.as_deref()),
    )?;
    Ok(json!({ "classId": class_id }))
}

fn classes_list(conn: &Connection, _params: &serde_json::Value) -> HandlerResult {
    let year_id = context::resolve_current(conn)?.map(|c| c.academic_year_id);
    let mut stmt = conn.prepare(
        "SELECT c.id, c.name, c.level, c.class_teacher_id,
                (SELECT COUNT(*) FROM enrollments e
                 WHERE e.class_id = c.id AND e.academic_year_id = ?)
         FROM classes c
         ORDER BY c.name",
    )?;
    let classes = stmt
        .query_map([year_id.as_deref()], |r| {
            let level: String = r.get(2)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "gradingLevel": SchoolLevel::normalize(Some(&level)).as_str(),
                "level": level,
                "classTeacherId": r.get::<_, Option<String>>(3)?,
                "studentCount": r.get::<_, i64>(4)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "classes": classes }))
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let first_name = get_required_str(params, "firstName")?;
    let last_name = get_required_str(params, "lastName")?;
    let parent_id = get_optional_str(params, "parentId");
    if let Some(p) = parent_id.as_deref() {
        require_row(conn, "parents", "parent", p)?;
    }
    let student_id = new_id();
    conn.execute(
        "INSERT INTO students(id, first_name, last_name, parent_id, created_at) VALUES(?, ?, ?, ?, ?)",
        (&student_id, &first_name, &last_name, parent_id.as_deref(), db::now_stamp()),
    )?;
    Ok(json!({ "studentId": student_id }))
}

/// Enrollments, assessments, term reports, attendance and invoices go with
/// the student through the foreign keys; the cohorts left behind are re-ranked.
fn students_delete(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let student_id = get_required_str(params, "studentId")?;
    recorder::remove_student(conn, &student_id)?;
    Ok(json!({ "ok": true }))
}

fn years_create(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let name = get_required_str(params, "name")?;
    let start = get_required_date(params, "startDate")?;
    let end = get_required_date(params, "endDate")?;
    if end < start {
        return Err(HandlerErr::bad_params("endDate must not precede startDate"));
    }
    let year_id = new_id();
    conn.execute(
        "INSERT INTO academic_years(id, name, start_date, end_date, is_current) VALUES(?, ?, ?, ?, 0)",
        (
            &year_id,
            &name,
            start.format("%Y-%m-%d").to_string(),
            end.format("%Y-%m-%d").to_string(),
        ),
    )?;
    Ok(json!({ "academicYearId": year_id }))
}

fn terms_create(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let year_id = get_required_str(params, "academicYearId")?;
    let name = get_required_str(params, "name")?;
    let term_number = get_required_i64(params, "termNumber")?;
    if !(1..=3).contains(&term_number) {
        return Err(HandlerErr::bad_params("termNumber must be 1, 2 or 3"));
    }
    let start = get_required_date(params, "startDate")?;
    let end = get_required_date(params, "endDate")?;
    if end < start {
        return Err(HandlerErr::bad_params("endDate must not precede startDate"));
    }
    require_row(conn, "academic_years", "academic year", &year_id)?;
    let taken = conn
        .query_row(
            "SELECT 1 FROM terms WHERE academic_year_id = ? AND term_number = ?",
            (&year_id, term_number),
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some();
    if taken {
        return Err(HandlerErr::bad_params(format!(
            "term {} already exists for this academic year",
            term_number
        )));
    }
    let term_id = new_id();
    conn.execute(
        "INSERT INTO terms(id, academic_year_id, name, term_number, start_date, end_date, is_current)
         VALUES(?, ?, ?, ?, ?, ?, 0)",
        (
            &term_id,
            &year_id,
            &name,
            term_number,
            start.format("%Y-%m-%d").to_string(),
            end.format("%Y-%m-%d").to_string(),
        ),
    )?;
    Ok(json!({ "termId": term_id }))
}

fn terms_set_current(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let term_id = get_required_str(params, "termId")?;
    let tx = db::write_tx(conn)?;
    let year_id: Option<String> = tx
        .query_row(
            "SELECT academic_year_id FROM terms WHERE id = ?",
            [&term_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(year_id) = year_id else {
        return Err(CoreError::not_found("term", term_id).into());
    };
    tx.execute(
        "UPDATE academic_years SET is_current = CASE WHEN id = ? THEN 1 ELSE 0 END",
        [&year_id],
    )?;
    tx.execute(
        "UPDATE terms SET is_current = CASE WHEN id = ? THEN 1 ELSE 0 END",
        [&term_id],
    )?;
    tx.commit()?;
    info!(target: "gradebookd", term = %term_id, year = %year_id, "active term changed");
    Ok(json!({ "termId": term_id, "academicYearId": year_id }))
}

fn terms_current(conn: &Connection, _params: &serde_json::Value) -> HandlerResult {
    let ctx = context::require_current(conn)?;
    Ok(json!(ctx))
}

fn subjects_create(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let name = get_required_str(params, "name")?;
    let code = get_optional_str(params, "code");
    let subject_id = new_id();
    conn.execute(
        "INSERT INTO subjects(id, name, code) VALUES(?, ?, ?)",
        (&subject_id, &name, code.as_deref()),
    )?;
    Ok(json!({ "subjectId": subject_id }))
}

fn offerings_create(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let class_id = get_required_str(params, "classId")?;
    let subject_id = get_required_str(params, "subjectId")?;
    let teacher_id = get_optional_str(params, "teacherId");
    let ctx = context::require_current(conn)?;
    require_row(conn, "classes", "class", &class_id)?;
    require_row(conn, "subjects", "subject", &subject_id)?;
    if let Some(t) = teacher_id.as_deref() {
        require_row(conn, "staff", "staff", t)?;
    }
    let taken = conn
        .query_row(
            "SELECT 1 FROM subject_offerings
             WHERE class_id = ? AND subject_id = ? AND academic_year_id = ?",
            (&class_id, &subject_id, &ctx.academic_year_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some();
    if taken {
        return Err(HandlerErr::bad_params(
            "subject is already offered to this class this year",
        ));
    }
    let offering_id = new_id();
    conn.execute(
        "INSERT INTO subject_offerings(id, class_id, subject_id, teacher_id, academic_year_id)
         VALUES(?, ?, ?, ?, ?)",
        (
            &offering_id,
            &class_id,
            &subject_id,
            teacher_id.as_deref(),
            &ctx.academic_year_id,
        ),
    )?;
    Ok(json!({ "offeringId": offering_id }))
}

fn offerings_list(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let class_id = get_required_str(params, "classId")?;
    require_row(conn, "classes", "class", &class_id)?;
    let ctx = context::require_current(conn)?;
    let mut stmt = conn.prepare(
        "SELECT o.id, o.subject_id, s.name, s.code, o.teacher_id,
                CASE WHEN t.id IS NULL THEN NULL ELSE t.first_name || ' ' || t.last_name END
         FROM subject_offerings o
         JOIN subjects s ON s.id = o.subject_id
         LEFT JOIN staff t ON t.id = o.teacher_id
         WHERE o.class_id = ? AND o.academic_year_id = ?
         ORDER BY s.name",
    )?;
    let offerings = stmt
        .query_map((&class_id, &ctx.academic_year_id), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "subjectId": r.get::<_, String>(1)?,
                "subjectName": r.get::<_, String>(2)?,
                "subjectCode": r.get::<_, Option<String>>(3)?,
                "teacherId": r.get::<_, Option<String>>(4)?,
                "teacherName": r.get::<_, Option<String>>(5)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "offerings": offerings }))
}

fn offerings_delete(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let offering_id = get_required_str(params, "offeringId")?;
    let changed = conn.execute("DELETE FROM subject_offerings WHERE id = ?", [&offering_id])?;
    if changed == 0 {
        return Err(CoreError::not_found("offering", offering_id).into());
    }
    Ok(json!({ "ok": true }))
}

fn enrollments_create(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let student_id = get_required_str(params, "studentId")?;
    let class_id = get_required_str(params, "classId")?;
    let ctx = context::require_current(conn)?;
    require_row(conn, "students", "student", &student_id)?;
    require_row(conn, "classes", "class", &class_id)?;
    let existing: Option<String> = conn
        .query_row(
            "SELECT class_id FROM enrollments WHERE student_id = ? AND academic_year_id = ?",
            (&student_id, &ctx.academic_year_id),
            |r| r.get(0),
        )
        .optional()?;
    if let Some(existing_class) = existing {
        return Err(HandlerErr {
            code: "bad_params",
            message: "student is already enrolled for this academic year".to_string(),
            details: Some(json!({ "classId": existing_class })),
        });
    }
    let enrollment_id = new_id();
    conn.execute(
        "INSERT INTO enrollments(id, student_id, class_id, academic_year_id, enrolled_on)
         VALUES(?, ?, ?, ?, ?)",
        (
            &enrollment_id,
            &student_id,
            &class_id,
            &ctx.academic_year_id,
            chrono::Local::now().date_naive().format("%Y-%m-%d").to_string(),
        ),
    )?;
    Ok(json!({ "enrollmentId": enrollment_id }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttendanceEntry {
    student_id: String,
    status: String,
}

fn attendance_record(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let actor_id = get_required_str(params, "actorId")?;
    let class_id = get_required_str(params, "classId")?;
    let date = get_required_date(params, "date")?.format("%Y-%m-%d").to_string();
    let entries: Vec<AttendanceEntry> = crate::ipc::helpers::from_params(params, "entries")?;

    require_row(conn, "classes", "class", &class_id)?;
    auth::authorize(conn, &actor_id, Capability::ClassRecords { class_id: &class_id })?;

    let mut seen = HashSet::new();
    for (i, e) in entries.iter().enumerate() {
        if !ATTENDANCE_STATUSES.contains(&e.status.to_ascii_lowercase().as_str()) {
            return Err(HandlerErr {
                code: "bad_params",
                message: "status must be present, absent, late or excused".to_string(),
                details: Some(json!({ "index": i, "status": e.status })),
            });
        }
        if !seen.insert(e.student_id.as_str()) {
            return Err(HandlerErr {
                code: "bad_params",
                message: "duplicate studentId in batch".to_string(),
                details: Some(json!({ "index": i, "studentId": e.student_id })),
            });
        }
    }

    let tx = db::write_tx(conn)?;
    for e in &entries {
        if !row_exists(&tx, "students", &e.student_id)? {
            return Err(CoreError::not_found("student", e.student_id.clone()).into());
        }
        tx.execute(
            "INSERT INTO attendance(id, student_id, class_id, date, status, recorded_by)
             VALUES(?, ?, ?, ?, ?, ?)
             ON CONFLICT(student_id, date) DO UPDATE SET
               class_id = excluded.class_id,
               status = excluded.status,
               recorded_by = excluded.recorded_by",
            (
                new_id(),
                &e.student_id,
                &class_id,
                &date,
                e.status.to_ascii_lowercase(),
                &actor_id,
            ),
        )?;
    }
    tx.commit()?;
    info!(
        target: "gradebookd",
        actor = %actor_id,
        class = %class_id,
        %date,
        saved = entries.len(),
        "attendance recorded"
    );
    Ok(json!({ "savedCount": entries.len() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: fn(&Connection, &serde_json::Value) -> HandlerResult = match req.method.as_str() {
        "staff.create" => staff_create,
        "parents.create" => parents_create,
        "classes.create" => classes_create,
        "classes.list" => classes_list,
        "students.create" => students_create,
        "students.delete" => students_delete,
        "years.create" => years_create,
        "terms.create" => terms_create,
        "terms.setCurrent" => terms_set_current,
        "terms.current" => terms_current,
        "subjects.create" => subjects_create,
        "offerings.create" => offerings_create,
        "offerings.list" => offerings_list,
        "offerings.delete" => offerings_delete,
        "enrollments.create" => enrollments_create,
        "attendance.record" => attendance_record,
        _ => return None,
    };
    Some(with_db(state, req, handler))
}
