use crate::context::AcademicContext;
use crate::db;
use crate::error::{CoreError, CoreResult};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    MobileMoney,
    BankTransfer,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::MobileMoney => "mobile_money",
            PaymentMethod::BankTransfer => "bank_transfer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    Partial,
    Completed,
}

impl InvoiceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Partial => "partial",
            InvoiceStatus::Completed => "completed",
        }
    }
}

/// Balance and status after any change to the paid amount. Amounts are in
/// minor currency units.
pub fn settle(total: i64, discount: i64, paid: i64) -> (i64, InvoiceStatus) {
    let balance = total - discount - paid;
    if balance <= 0 {
        (0, InvoiceStatus::Completed)
    } else if paid > 0 {
        (balance, InvoiceStatus::Partial)
    } else {
        (balance, InvoiceStatus::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceOutcome {
    pub generated_count: usize,
    pub skipped_count: usize,
}

struct FeeLine {
    category_id: String,
    description: String,
    amount: i64,
}

/// `PREFIX-yyyymmdd-nnnn`, continuing after the highest number already issued
/// that day. Rows removed by cascades never cause a number to be reissued
/// while a later one still exists.
fn next_number(
    conn: &Connection,
    prefix: &str,
    table: &str,
    column: &str,
    day: NaiveDate,
) -> CoreResult<String> {
    let stem = format!("{}-{}-", prefix, day.format("%Y%m%d"));
    let sql = format!(
        "SELECT MAX(CAST(substr({col}, ?) AS INTEGER)) FROM {table} WHERE {col} LIKE ? || '%'",
        col = column,
        table = table
    );
    let last: Option<i64> = conn.query_row(
        &sql,
        (stem.len() as i64 + 1, &stem),
        |r| r.get(0),
    )?;
    Ok(format!("{}{:04}", stem, last.unwrap_or(0) + 1))
}

/// One invoice per enrolled student for the active term. Students already
/// invoiced for the term are skipped.
pub fn generate_invoices(
    conn: &Connection,
    ctx: &AcademicContext,
    class_id: &str,
    actor_id: &str,
    today: NaiveDate,
) -> CoreResult<InvoiceOutcome> {
    let tx = db::write_tx(conn)?;

    let class_exists = tx
        .query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| r.get::<_, i64>(0))
        .optional()?
        .is_some();
    if !class_exists {
        return Err(CoreError::not_found("class", class_id));
    }

    let lines: Vec<FeeLine> = {
        let mut stmt = tx.prepare(
            "SELECT fs.category_id, fc.name, fs.amount
             FROM fee_structures fs
             JOIN fee_categories fc ON fc.id = fs.category_id
             WHERE fs.class_id = ? AND fs.academic_year_id = ?
               AND (fs.term_number = ? OR (fs.term_number = 0 AND ? = 1))
             ORDER BY fc.name",
        )?;
        let rows = stmt
            .query_map(
                (class_id, &ctx.academic_year_id, ctx.term.term_number, ctx.term.term_number),
                |r| {
                    Ok(FeeLine {
                        category_id: r.get(0)?,
                        description: r.get(1)?,
                        amount: r.get(2)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };
    if lines.is_empty() {
        return Err(CoreError::InvalidState(
            "no fee structure applies to this class and term".to_string(),
        ));
    }
    let total: i64 = lines.iter().map(|l| l.amount).sum();

    let students: Vec<String> = {
        let mut stmt = tx.prepare(
            "SELECT student_id FROM enrollments WHERE class_id = ? AND academic_year_id = ?",
        )?;
        let rows = stmt
            .query_map((class_id, &ctx.academic_year_id), |r| r.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    let stamp = db::now_stamp();
    let issue_date = today.format("%Y-%m-%d").to_string();
    let (balance, status) = settle(total, 0, 0);
    let mut outcome = InvoiceOutcome {
        generated_count: 0,
        skipped_count: 0,
    };

    for student_id in &students {
        let existing = tx
            .query_row(
                "SELECT 1 FROM fee_invoices WHERE student_id = ? AND term_id = ?",
                (student_id, &ctx.term.id),
                |r| r.get::<_, i64>(0),
            )
            .optional()?;
        if existing.is_some() {
            outcome.skipped_count += 1;
            continue;
        }

        let invoice_id = Uuid::new_v4().to_string();
        let number = next_number(&tx, "INV", "fee_invoices", "invoice_number", today)?;
        tx.execute(
            "INSERT INTO fee_invoices(
                id, invoice_number, student_id, term_id, total_amount,
                discount_amount, amount_paid, balance, status, issue_date, created_at
             ) VALUES(?, ?, ?, ?, ?, 0, 0, ?, ?, ?, ?)",
            rusqlite::params![
                &invoice_id,
                &number,
                student_id,
                &ctx.term.id,
                total,
                balance,
                status.as_str(),
                &issue_date,
                &stamp,
            ],
        )?;
        for line in &lines {
            tx.execute(
                "INSERT INTO fee_invoice_items(id, invoice_id, category_id, description, amount)
                 VALUES(?, ?, ?, ?, ?)",
                (
                    Uuid::new_v4().to_string(),
                    &invoice_id,
                    &line.category_id,
                    &line.description,
                    line.amount,
                ),
            )?;
        }
        outcome.generated_count += 1;
    }
    tx.commit()?;

    info!(
        target: "fees",
        actor = %actor_id,
        class = %class_id,
        term = %ctx.term.id,
        generated = outcome.generated_count,
        skipped = outcome.skipped_count,
        "invoices generated"
    );
    Ok(outcome)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInput {
    pub amount: i64,
    pub method: PaymentMethod,
    pub payer_name: Option<String>,
    pub reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReceipt {
    pub payment_id: String,
    pub receipt_number: String,
    pub amount_paid: i64,
    pub balance: i64,
    pub status: InvoiceStatus,
}

/// Manual payment capture. The amount must be positive and not exceed the
/// outstanding balance.
pub fn record_payment(
    conn: &Connection,
    invoice_id: &str,
    actor_id: &str,
    input: &PaymentInput,
    today: NaiveDate,
) -> CoreResult<PaymentReceipt> {
    let tx = db::write_tx(conn)?;
    let row: Option<(i64, i64, i64, i64)> = tx
        .query_row(
            "SELECT total_amount, discount_amount, amount_paid, balance
             FROM fee_invoices WHERE id = ?",
            [invoice_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()?;
    let Some((total, discount, paid, balance)) = row else {
        return Err(CoreError::not_found("invoice", invoice_id));
    };
    if input.amount <= 0 || input.amount > balance {
        return Err(CoreError::Validation {
            message: "amount must be greater than 0 and not exceed the balance".to_string(),
            details: Some(serde_json::json!({ "amount": input.amount, "balance": balance })),
        });
    }

    let payment_id = Uuid::new_v4().to_string();
    let receipt_number = next_number(&tx, "RCT", "payments", "receipt_number", today)?;
    tx.execute(
        "INSERT INTO payments(
            id, receipt_number, invoice_id, amount, method, payer_name, reference, paid_at, received_by
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            &payment_id,
            &receipt_number,
            invoice_id,
            input.amount,
            input.method.as_str(),
            input.payer_name.as_deref(),
            input.reference.as_deref(),
            db::now_stamp(),
            actor_id,
        ],
    )?;

    let amount_paid = paid + input.amount;
    let (balance, status) = settle(total, discount, amount_paid);
    tx.execute(
        "UPDATE fee_invoices SET amount_paid = ?, balance = ?, status = ? WHERE id = ?",
        (amount_paid, balance, status.as_str(), invoice_id),
    )?;
    tx.commit()?;

    info!(
        target: "fees",
        actor = %actor_id,
        invoice = %invoice_id,
        receipt = %receipt_number,
        amount = input.amount,
        balance,
        "payment recorded"
    );
    Ok(PaymentReceipt {
        payment_id,
        receipt_number,
        amount_paid,
        balance,
        status,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceSummary {
    pub id: String,
    pub invoice_number: String,
    pub student_id: String,
    pub student_name: String,
    pub term_id: String,
    pub total_amount: i64,
    pub amount_paid: i64,
    pub balance: i64,
    pub status: String,
    pub issue_date: String,
}

const INVOICE_SELECT: &str = "SELECT i.id, i.invoice_number, i.student_id,
        s.last_name || ', ' || s.first_name, i.term_id, i.total_amount,
        i.amount_paid, i.balance, i.status, i.issue_date
     FROM fee_invoices i
     JOIN students s ON s.id = i.student_id";

fn invoice_rows(
    conn: &Connection,
    where_order: &str,
    param: &str,
) -> CoreResult<Vec<InvoiceSummary>> {
    let sql = format!("{} {}", INVOICE_SELECT, where_order);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([param], |r| {
            Ok(InvoiceSummary {
                id: r.get(0)?,
                invoice_number: r.get(1)?,
                student_id: r.get(2)?,
                student_name: r.get(3)?,
                term_id: r.get(4)?,
                total_amount: r.get(5)?,
                amount_paid: r.get(6)?,
                balance: r.get(7)?,
                status: r.get(8)?,
                issue_date: r.get(9)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn term_invoices(conn: &Connection, term_id: &str) -> CoreResult<Vec<InvoiceSummary>> {
    invoice_rows(conn, "WHERE i.term_id = ? ORDER BY i.invoice_number", term_id)
}

pub fn term_debtors(conn: &Connection, term_id: &str) -> CoreResult<Vec<InvoiceSummary>> {
    invoice_rows(
        conn,
        "WHERE i.term_id = ? AND i.balance > 0 ORDER BY i.balance DESC, i.invoice_number",
        term_id,
    )
}

pub fn student_invoices(conn: &Connection, student_id: &str) -> CoreResult<Vec<InvoiceSummary>> {
    invoice_rows(
        conn,
        "WHERE i.student_id = ? ORDER BY i.created_at DESC",
        student_id,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context;
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

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, 8).expect("date")
    }

    fn seeded() -> Connection {
        let conn = db::open_db(&temp_dir("gradebook-fees")).expect("open db");
        conn.execute_batch(
            "INSERT INTO staff(id, first_name, last_name, role, created_at)
               VALUES('acc', 'Abena', 'Ofori', 'accounts', 'now');
             INSERT INTO classes(id, name, level) VALUES('c1', 'Basic 1', 'Primary');
             INSERT INTO academic_years(id, name, start_date, end_date, is_current)
               VALUES('y1', '2025/2026', '2025-09-01', '2026-07-31', 1);
             INSERT INTO terms(id, academic_year_id, name, term_number, start_date, end_date, is_current)
               VALUES('term1', 'y1', 'First Term', 1, '2025-09-01', '2025-12-15', 1);
             INSERT INTO students(id, first_name, last_name, created_at) VALUES
               ('s1', 'Akua', 'Adjei', 'now'), ('s2', 'Kwame', 'Badu', 'now');
             INSERT INTO enrollments(id, student_id, class_id, academic_year_id, enrolled_on) VALUES
               ('e1', 's1', 'c1', 'y1', '2025-09-01'), ('e2', 's2', 'c1', 'y1', '2025-09-01');
             INSERT INTO fee_categories(id, name, is_recurring) VALUES
               ('tuition', 'Tuition', 1), ('pta', 'PTA Levy', 0), ('sports', 'Sports', 1);
             INSERT INTO fee_structures(id, class_id, academic_year_id, category_id, amount, term_number) VALUES
               ('f1', 'c1', 'y1', 'tuition', 45000, 1),
               ('f2', 'c1', 'y1', 'pta', 5000, 0),
               ('f3', 'c1', 'y1', 'sports', 2000, 2);",
        )
        .expect("seed");
        conn
    }

    #[test]
    fn settle_status_transitions() {
        assert_eq!(settle(1000, 0, 0), (1000, InvoiceStatus::Pending));
        assert_eq!(settle(1000, 100, 400), (500, InvoiceStatus::Partial));
        assert_eq!(settle(1000, 100, 900), (0, InvoiceStatus::Completed));
        assert_eq!(settle(1000, 200, 900), (0, InvoiceStatus::Completed));
    }

    #[test]
    fn invoices_cover_term_and_annual_fees_once() {
        let conn = seeded();
        let ctx = context::require_current(&conn).expect("ctx");
        let out = generate_invoices(&conn, &ctx, "c1", "acc", day()).expect("generate");
        assert_eq!(out, InvoiceOutcome { generated_count: 2, skipped_count: 0 });

        let invoices = term_invoices(&conn, "term1").expect("list");
        assert_eq!(invoices.len(), 2);
        assert!(invoices.iter().all(|i| i.total_amount == 50000 && i.balance == 50000));
        assert_eq!(invoices[0].invoice_number, "INV-20250908-0001");

        let again = generate_invoices(&conn, &ctx, "c1", "acc", day()).expect("again");
        assert_eq!(again, InvoiceOutcome { generated_count: 0, skipped_count: 2 });
    }

    #[test]
    fn numbering_survives_cascaded_deletes() {
        let conn = seeded();
        let ctx = context::require_current(&conn).expect("ctx");
        generate_invoices(&conn, &ctx, "c1", "acc", day()).expect("generate");
        let first = term_invoices(&conn, "term1").expect("list");
        let (removed, kept) = (&first[0], &first[1]);
        assert_eq!(removed.invoice_number, "INV-20250908-0001");
        let pay = PaymentInput {
            amount: 1000,
            method: PaymentMethod::Cash,
            payer_name: None,
            reference: None,
        };
        record_payment(&conn, &removed.id, "acc", &pay, day()).expect("pay removed");
        record_payment(&conn, &kept.id, "acc", &pay, day()).expect("pay kept");

        conn.execute("DELETE FROM students WHERE id = ?", [&removed.student_id])
            .expect("delete student");

        conn.execute_batch(
            "INSERT INTO classes(id, name, level) VALUES('c2', 'Basic 2', 'Primary');
             INSERT INTO students(id, first_name, last_name, created_at) VALUES('s3', 'Esi', 'Owusu', 'now');
             INSERT INTO enrollments(id, student_id, class_id, academic_year_id, enrolled_on)
               VALUES('e3', 's3', 'c2', 'y1', '2025-09-01');
             INSERT INTO fee_structures(id, class_id, academic_year_id, category_id, amount, term_number)
               VALUES('f4', 'c2', 'y1', 'tuition', 30000, 1);",
        )
        .expect("second class");
        let out = generate_invoices(&conn, &ctx, "c2", "acc", day()).expect("generate c2");
        assert_eq!(out.generated_count, 1);
        let numbers: Vec<String> = term_invoices(&conn, "term1")
            .expect("list")
            .into_iter()
            .map(|i| i.invoice_number)
            .collect();
        assert_eq!(numbers.len(), 2);
        assert!(numbers.contains(&"INV-20250908-0003".to_string()), "{:?}", numbers);

        let r = record_payment(&conn, &kept.id, "acc", &pay, day()).expect("pay again");
        assert_eq!(r.receipt_number, "RCT-20250908-0003");

        let next_day = day().succ_opt().expect("next day");
        let r = record_payment(&conn, &kept.id, "acc", &pay, next_day).expect("next day");
        assert_eq!(r.receipt_number, "RCT-20250909-0001");
    }

    #[test]
    fn payments_move_balance_and_status() {
        let conn = seeded();
        let ctx = context::require_current(&conn).expect("ctx");
        generate_invoices(&conn, &ctx, "c1", "acc", day()).expect("generate");
        let invoice = term_invoices(&conn, "term1").expect("list").remove(0);

        let partial = PaymentInput {
            amount: 20000,
            method: PaymentMethod::MobileMoney,
            payer_name: Some("Parent".to_string()),
            reference: Some("MM-1".to_string()),
        };
        let r = record_payment(&conn, &invoice.id, "acc", &partial, day()).expect("pay");
        assert_eq!(r.receipt_number, "RCT-20250908-0001");
        assert_eq!((r.balance, r.status), (30000, InvoiceStatus::Partial));

        let too_much = PaymentInput { amount: 30001, ..partial.clone() };
        let err = record_payment(&conn, &invoice.id, "acc", &too_much, day()).expect_err("over");
        assert_eq!(err.code(), "bad_params");
        let zero = PaymentInput { amount: 0, ..partial.clone() };
        assert!(record_payment(&conn, &invoice.id, "acc", &zero, day()).is_err());

        let rest = PaymentInput { amount: 30000, ..partial };
        let r = record_payment(&conn, &invoice.id, "acc", &rest, day()).expect("settle");
        assert_eq!((r.balance, r.status), (0, InvoiceStatus::Completed));

        let debtors = term_debtors(&conn, "term1").expect("debtors");
        assert_eq!(debtors.len(), 1);
        assert_ne!(debtors[0].id, invoice.id);
    }
}
