use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

pub const DB_FILE_NAME: &str = "gradebook.sqlite3";
const BUSY_TIMEOUT: Duration = Duration::from_secs(15);

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS staff(
            id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            role TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS parents(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            phone TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            level TEXT NOT NULL,
            class_teacher_id TEXT,
            FOREIGN KEY(class_teacher_id) REFERENCES staff(id) ON DELETE SET NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            parent_id TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(parent_id) REFERENCES parents(id) ON DELETE SET NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_parent ON students(parent_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS academic_years(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            is_current INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS terms(
            id TEXT PRIMARY KEY,
            academic_year_id TEXT NOT NULL,
            name TEXT NOT NULL,
            term_number INTEGER NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            is_current INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(academic_year_id) REFERENCES academic_years(id) ON DELETE CASCADE,
            UNIQUE(academic_year_id, term_number)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            code TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS subject_offerings(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            teacher_id TEXT,
            academic_year_id TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id) ON DELETE CASCADE,
            FOREIGN KEY(subject_id) REFERENCES subjects(id) ON DELETE CASCADE,
            FOREIGN KEY(teacher_id) REFERENCES staff(id) ON DELETE SET NULL,
            FOREIGN KEY(academic_year_id) REFERENCES academic_years(id) ON DELETE CASCADE,
            UNIQUE(class_id, subject_id, academic_year_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subject_offerings_class ON subject_offerings(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            academic_year_id TEXT NOT NULL,
            enrolled_on TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE,
            FOREIGN KEY(class_id) REFERENCES classes(id) ON DELETE CASCADE,
            FOREIGN KEY(academic_year_id) REFERENCES academic_years(id) ON DELETE CASCADE,
            UNIQUE(student_id, academic_year_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_class_year ON enrollments(class_id, academic_year_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assessments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            offering_id TEXT NOT NULL,
            term_id TEXT NOT NULL,
            classwork REAL NOT NULL DEFAULT 0,
            homework REAL NOT NULL DEFAULT 0,
            project REAL NOT NULL DEFAULT 0,
            exam REAL NOT NULL DEFAULT 0,
            total_score REAL,
            grade TEXT,
            grade_remark TEXT,
            class_position INTEGER,
            teacher_remarks TEXT,
            recorded_by TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE,
            FOREIGN KEY(offering_id) REFERENCES subject_offerings(id) ON DELETE CASCADE,
            FOREIGN KEY(term_id) REFERENCES terms(id) ON DELETE CASCADE,
            FOREIGN KEY(recorded_by) REFERENCES staff(id) ON DELETE SET NULL,
            UNIQUE(student_id, offering_id, term_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assessments_cohort ON assessments(offering_id, term_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assessments_student_term ON assessments(student_id, term_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS term_reports(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            term_id TEXT NOT NULL,
            enrollment_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            total_marks REAL,
            average_score REAL,
            class_position INTEGER,
            class_size INTEGER,
            total_days INTEGER NOT NULL DEFAULT 0,
            days_present INTEGER NOT NULL DEFAULT 0,
            days_absent INTEGER NOT NULL DEFAULT 0,
            class_teacher_remarks TEXT,
            head_remarks TEXT,
            next_term_begins TEXT,
            promotion_status TEXT,
            is_published INTEGER NOT NULL DEFAULT 0,
            published_at TEXT,
            generated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE,
            FOREIGN KEY(term_id) REFERENCES terms(id) ON DELETE CASCADE,
            FOREIGN KEY(enrollment_id) REFERENCES enrollments(id) ON DELETE CASCADE,
            FOREIGN KEY(class_id) REFERENCES classes(id) ON DELETE CASCADE,
            UNIQUE(student_id, term_id)
        )",
        [],
    )?;
    ensure_term_reports_conduct_columns(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_term_reports_cohort ON term_reports(class_id, term_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL,
            recorded_by TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE,
            FOREIGN KEY(class_id) REFERENCES classes(id) ON DELETE CASCADE,
            FOREIGN KEY(recorded_by) REFERENCES staff(id) ON DELETE SET NULL,
            UNIQUE(student_id, date)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_class_date ON attendance(class_id, date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_categories(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            is_recurring INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;
    // term_number 0 marks an annual fee so the UNIQUE key never holds a NULL.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_structures(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            academic_year_id TEXT NOT NULL,
            category_id TEXT NOT NULL,
            amount INTEGER NOT NULL,
            term_number INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(class_id) REFERENCES classes(id) ON DELETE CASCADE,
            FOREIGN KEY(academic_year_id) REFERENCES academic_years(id) ON DELETE CASCADE,
            FOREIGN KEY(category_id) REFERENCES fee_categories(id) ON DELETE CASCADE,
            UNIQUE(class_id, academic_year_id, category_id, term_number)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_invoices(
            id TEXT PRIMARY KEY,
            invoice_number TEXT NOT NULL UNIQUE,
            student_id TEXT NOT NULL,
            term_id TEXT NOT NULL,
            total_amount INTEGER NOT NULL,
            discount_amount INTEGER NOT NULL DEFAULT 0,
            amount_paid INTEGER NOT NULL DEFAULT 0,
            balance INTEGER NOT NULL,
            status TEXT NOT NULL,
            issue_date TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE,
            FOREIGN KEY(term_id) REFERENCES terms(id) ON DELETE CASCADE,
            UNIQUE(student_id, term_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_invoice_items(
            id TEXT PRIMARY KEY,
            invoice_id TEXT NOT NULL,
            category_id TEXT,
            description TEXT NOT NULL,
            amount INTEGER NOT NULL,
            FOREIGN KEY(invoice_id) REFERENCES fee_invoices(id) ON DELETE CASCADE,
            FOREIGN KEY(category_id) REFERENCES fee_categories(id) ON DELETE SET NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS payments(
            id TEXT PRIMARY KEY,
            receipt_number TEXT NOT NULL UNIQUE,
            invoice_id TEXT NOT NULL,
            amount INTEGER NOT NULL,
            method TEXT NOT NULL,
            payer_name TEXT,
            reference TEXT,
            paid_at TEXT NOT NULL,
            received_by TEXT,
            FOREIGN KEY(invoice_id) REFERENCES fee_invoices(id) ON DELETE CASCADE,
            FOREIGN KEY(received_by) REFERENCES staff(id) ON DELETE SET NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fee_invoices_term ON fee_invoices(term_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_invoice ON payments(invoice_id)",
        [],
    )?;

    Ok(conn)
}

/// Single-writer transaction: takes the write lock up front, so a batch that
/// reads and then rewrites a whole cohort never interleaves with another
/// writer on the same workspace.
pub fn write_tx(conn: &Connection) -> rusqlite::Result<Transaction<'_>> {
    Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
}

pub fn now_stamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn ensure_term_reports_conduct_columns(conn: &Connection) -> anyhow::Result<()> {
    for column in ["conduct", "attitude", "interest"] {
        if !table_has_column(conn, "term_reports", column)? {
            conn.execute(
                &format!("ALTER TABLE term_reports ADD COLUMN {} TEXT", column),
                [],
            )?;
        }
    }
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
