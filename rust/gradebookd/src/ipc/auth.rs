//! Capability check run before every mutating core call. The core itself
//! never looks at roles.

use crate::ipc::helpers::HandlerErr;
use rusqlite::{Connection, OptionalExtension};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Headteacher,
    Teacher,
    Accounts,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Role> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "headteacher" => Some(Role::Headteacher),
            "teacher" => Some(Role::Teacher),
            "accounts" => Some(Role::Accounts),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Headteacher => "headteacher",
            Role::Teacher => "teacher",
            Role::Accounts => "accounts",
        }
    }
}

pub enum Capability<'a> {
    /// Scores and remarks of one subject offering.
    Scores { offering_id: &'a str },
    /// Term reports and attendance of one class.
    ClassRecords { class_id: &'a str },
    /// Invoicing and payment capture.
    Fees,
}

fn forbidden(message: impl Into<String>) -> HandlerErr {
    HandlerErr::new("forbidden", message)
}

pub fn authorize(
    conn: &Connection,
    actor_id: &str,
    cap: Capability<'_>,
) -> Result<Role, HandlerErr> {
    let role: Option<String> = conn
        .query_row("SELECT role FROM staff WHERE id = ?", [actor_id], |r| r.get(0))
        .optional()?;
    let Some(role) = role.as_deref().and_then(Role::parse) else {
        return Err(forbidden(format!("unknown actor {}", actor_id)));
    };

    let allowed = match (role, &cap) {
        (Role::Admin | Role::Headteacher, _) => true,
        (Role::Teacher, Capability::Scores { offering_id }) => conn
            .query_row(
                "SELECT 1 FROM subject_offerings WHERE id = ? AND teacher_id = ?",
                [*offering_id, actor_id],
                |r| r.get::<_, i64>(0),
            )
            .optional()?
            .is_some(),
        (Role::Teacher, Capability::ClassRecords { class_id }) => conn
            .query_row(
                "SELECT 1 FROM classes WHERE id = ? AND class_teacher_id = ?",
                [*class_id, actor_id],
                |r| r.get::<_, i64>(0),
            )
            .optional()?
            .is_some(),
        (Role::Accounts, Capability::Fees) => true,
        _ => false,
    };
    if !allowed {
        return Err(forbidden(format!(
            "{} {} may not perform this action",
            role.as_str(),
            actor_id
        )));
    }
    Ok(role)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> PathBuf {
        let p = std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    fn seeded() -> Connection {
        let conn = db::open_db(&temp_dir("gradebook-auth")).expect("open db");
        conn.execute_batch(
            "INSERT INTO staff(id, first_name, last_name, role, created_at) VALUES
               ('head', 'Ama', 'Mensah', 'headteacher', 'now'),
               ('t1', 'Kofi', 'Asante', 'teacher', 'now'),
               ('t2', 'Esi', 'Boateng', 'teacher', 'now'),
               ('acc', 'Abena', 'Ofori', 'accounts', 'now');
             INSERT INTO classes(id, name, level, class_teacher_id) VALUES('c1', 'JHS 1', 'JHS', 't1');
             INSERT INTO academic_years(id, name, start_date, end_date, is_current)
               VALUES('y1', '2025/2026', '2025-09-01', '2026-07-31', 1);
             INSERT INTO subjects(id, name) VALUES('math', 'Mathematics');
             INSERT INTO subject_offerings(id, class_id, subject_id, teacher_id, academic_year_id)
               VALUES('o1', 'c1', 'math', 't2', 'y1');",
        )
        .expect("seed");
        conn
    }

    fn code(r: Result<Role, HandlerErr>) -> &'static str {
        match r {
            Ok(_) => "ok",
            Err(e) => e.code,
        }
    }

    #[test]
    fn teachers_are_scoped_to_their_offerings_and_classes() {
        let conn = seeded();
        assert_eq!(code(authorize(&conn, "t2", Capability::Scores { offering_id: "o1" })), "ok");
        assert_eq!(
            code(authorize(&conn, "t1", Capability::Scores { offering_id: "o1" })),
            "forbidden"
        );
        assert_eq!(code(authorize(&conn, "t1", Capability::ClassRecords { class_id: "c1" })), "ok");
        assert_eq!(
            code(authorize(&conn, "t2", Capability::ClassRecords { class_id: "c1" })),
            "forbidden"
        );
        assert_eq!(code(authorize(&conn, "t1", Capability::Fees)), "forbidden");
    }

    #[test]
    fn head_may_do_everything_and_accounts_only_fees() {
        let conn = seeded();
        assert_eq!(code(authorize(&conn, "head", Capability::Scores { offering_id: "o1" })), "ok");
        assert_eq!(code(authorize(&conn, "head", Capability::Fees)), "ok");
        assert_eq!(code(authorize(&conn, "acc", Capability::Fees)), "ok");
        assert_eq!(
            code(authorize(&conn, "acc", Capability::ClassRecords { class_id: "c1" })),
            "forbidden"
        );
    }

    #[test]
    fn unknown_actor_is_forbidden() {
        let conn = seeded();
        assert_eq!(code(authorize(&conn, "ghost", Capability::Fees)), "forbidden");
    }
}
