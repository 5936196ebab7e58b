use crate::context;
use crate::error::CoreError;
use crate::fees::{self, InvoiceSummary, PaymentInput};
use crate::ipc::auth::{self, Capability};
use crate::ipc::helpers::{
    get_optional_str, get_required_i64, get_required_str, new_id, today, with_db, HandlerErr,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn fees_category_create(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let name = get_required_str(params, "name")?;
    let recurring = params
        .get("recurring")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);
    let taken = conn
        .query_row(
            "SELECT 1 FROM fee_categories WHERE name = ?",
            [&name],
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some();
    if taken {
        return Err(HandlerErr::bad_params(format!("fee category '{}' already exists", name)));
    }
    let category_id = new_id();
    conn.execute(
        "INSERT INTO fee_categories(id, name, is_recurring) VALUES(?, ?, ?)",
        (&category_id, &name, recurring as i64),
    )?;
    Ok(json!({ "categoryId": category_id }))
}

fn fees_structure_set(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let class_id = get_required_str(params, "classId")?;
    let category_id = get_required_str(params, "categoryId")?;
    let amount = get_required_i64(params, "amount")?;
    if amount < 0 {
        return Err(HandlerErr::bad_params("amount must not be negative"));
    }
    let term_number = match params.get("termNumber") {
        None | Some(serde_json::Value::Null) => 0,
        Some(v) => match v.as_i64() {
            Some(n) if (1..=3).contains(&n) => n,
            _ => return Err(HandlerErr::bad_params("termNumber must be 1, 2, 3 or null")),
        },
    };
    let ctx = context::require_current(conn)?;
    for (table, what, id) in [
        ("classes", "class", &class_id),
        ("fee_categories", "fee category", &category_id),
    ] {
        let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
        if conn
            .query_row(&sql, [id], |r| r.get::<_, i64>(0))
            .optional()?
            .is_none()
        {
            return Err(CoreError::not_found(what, id.clone()).into());
        }
    }

    conn.execute(
        "INSERT INTO fee_structures(id, class_id, academic_year_id, category_id, amount, term_number)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(class_id, academic_year_id, category_id, term_number) DO UPDATE SET
           amount = excluded.amount",
        (
            new_id(),
            &class_id,
            &ctx.academic_year_id,
            &category_id,
            amount,
            term_number,
        ),
    )?;
    let structure_id: String = conn.query_row(
        "SELECT id FROM fee_structures
         WHERE class_id = ? AND academic_year_id = ? AND category_id = ? AND term_number = ?",
        (&class_id, &ctx.academic_year_id, &category_id, term_number),
        |r| r.get(0),
    )?;
    Ok(json!({ "structureId": structure_id }))
}

fn fees_invoices_generate(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let actor_id = get_required_str(params, "actorId")?;
    let class_id = get_required_str(params, "classId")?;
    auth::authorize(conn, &actor_id, Capability::Fees)?;
    let ctx = context::require_current(conn)?;
    let outcome = fees::generate_invoices(conn, &ctx, &class_id, &actor_id, today(params)?)?;
    Ok(json!(outcome))
}

fn fees_payment_record(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let actor_id = get_required_str(params, "actorId")?;
    let invoice_id = get_required_str(params, "invoiceId")?;
    auth::authorize(conn, &actor_id, Capability::Fees)?;
    let input: PaymentInput = serde_json::from_value(params.clone())
        .map_err(|e| HandlerErr::bad_params(format!("invalid payment: {}", e)))?;
    let receipt = fees::record_payment(conn, &invoice_id, &actor_id, &input, today(params)?)?;
    Ok(json!(receipt))
}

fn totals(invoices: &[InvoiceSummary]) -> (i64, i64, i64) {
    invoices.iter().fold((0, 0, 0), |(expected, collected, outstanding), i| {
        (
            expected + i.total_amount,
            collected + i.amount_paid,
            outstanding + i.balance,
        )
    })
}

fn fees_invoices_list(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let term_id = match get_optional_str(params, "termId") {
        Some(t) => t,
        None => context::require_current(conn)?.term.id,
    };
    let invoices = fees::term_invoices(conn, &term_id)?;
    let (expected, collected, outstanding) = totals(&invoices);
    Ok(json!({
        "termId": term_id,
        "invoices": invoices,
        "totalExpected": expected,
        "totalCollected": collected,
        "totalOutstanding": outstanding,
    }))
}

fn fees_debtors(conn: &Connection, _params: &serde_json::Value) -> HandlerResult {
    let ctx = context::require_current(conn)?;
    let debtors = fees::term_debtors(conn, &ctx.term.id)?;
    let (_, _, outstanding) = totals(&debtors);
    Ok(json!({
        "termId": ctx.term.id,
        "debtors": debtors,
        "totalDebt": outstanding,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: fn(&Connection, &serde_json::Value) -> HandlerResult = match req.method.as_str() {
        "fees.categoryCreate" => fees_category_create,
        "fees.structureSet" => fees_structure_set,
        "fees.invoicesGenerate" => fees_invoices_generate,
        "fees.paymentRecord" => fees_payment_record,
        "fees.invoicesList" => fees_invoices_list,
        "fees.debtors" => fees_debtors,
        _ => return None,
    };
    Some(with_db(state, req, handler))
}
