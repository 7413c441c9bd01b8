use rusqlite::Connection;
use serde_json::json;

use crate::billing::{
    self, FeePatch, InvoiceStatus, NewFee, NewInvoice, NewInvoiceItem, NewPayment, PaymentPatch,
};
use crate::events::EventSink;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    get_optional_date, get_optional_money, get_optional_str, get_patch_str, get_required_date,
    get_required_money, get_required_str, to_json, with_workspace, HandlerResult,
};
use crate::ipc::types::{AppState, Request};

fn fees_create(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let fee = billing::create_fee(
        conn,
        NewFee {
            name: get_required_str(params, "name")?,
            description: get_optional_str(params, "description")?,
            amount: get_required_money(params, "amount")?,
        },
    )?;
    to_json(&fee)
}

fn fees_list(conn: &Connection) -> HandlerResult {
    let fees = billing::list_fees(conn)?;
    Ok(json!({ "fees": to_json(&fees)? }))
}

fn fees_update(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let fee_id = get_required_str(params, "feeId")?;
    let name = match get_optional_str(params, "name")? {
        Some(n) if n.trim().is_empty() => return Err(HandlerErr::bad_params("name must not be empty")),
        other => other,
    };
    let patch = FeePatch {
        name,
        description: get_patch_str(params, "description")?,
        amount: get_optional_money(params, "amount")?,
    };
    to_json(&billing::update_fee(conn, &fee_id, patch)?)
}

fn fees_delete(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let fee_id = get_required_str(params, "feeId")?;
    billing::delete_fee(conn, &fee_id)?;
    Ok(json!({ "ok": true }))
}

fn parse_items(params: &serde_json::Value) -> Result<Vec<NewInvoiceItem>, HandlerErr> {
    let Some(raw) = params.get("items").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("items must be an array"));
    };
    raw.iter()
        .map(|item| {
            if !item.is_object() {
                return Err(HandlerErr::bad_params("items must contain objects"));
            }
            Ok(NewInvoiceItem {
                fee_id: get_required_str(item, "feeId")?,
                description: get_optional_str(item, "description")?,
                amount: get_optional_money(item, "amount")?,
            })
        })
        .collect()
}

fn invoices_create(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let new = NewInvoice {
        student_id: get_required_str(params, "studentId")?,
        issue_date: get_required_date(params, "issueDate")?,
        due_date: get_required_date(params, "dueDate")?,
        items: parse_items(params)?,
    };
    to_json(&billing::create_invoice(conn, new)?)
}

fn invoices_list(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let student_id = get_optional_str(params, "studentId")?;
    let invoices = billing::list_invoices(conn, student_id.as_deref())?;
    Ok(json!({ "invoices": to_json(&invoices)? }))
}

fn invoices_get(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let invoice_id = get_required_str(params, "invoiceId")?;
    to_json(&billing::get_invoice(conn, &invoice_id)?)
}

fn invoices_set_status(
    conn: &Connection,
    sink: &dyn EventSink,
    params: &serde_json::Value,
) -> HandlerResult {
    let invoice_id = get_required_str(params, "invoiceId")?;
    let raw = get_required_str(params, "status")?;
    let Some(status) = InvoiceStatus::parse(&raw) else {
        return Err(HandlerErr::bad_params(format!("unknown invoice status: {}", raw)));
    };
    to_json(&billing::set_invoice_status(conn, sink, &invoice_id, status)?)
}

fn invoices_reconcile(
    conn: &Connection,
    sink: &dyn EventSink,
    params: &serde_json::Value,
) -> HandlerResult {
    let invoice_id = get_required_str(params, "invoiceId")?;
    let rec = billing::reconcile(conn, sink, &invoice_id)?;
    let mut out = to_json(&rec)?;
    out["changed"] = json!(rec.changed());
    Ok(out)
}

fn invoices_delete(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let invoice_id = get_required_str(params, "invoiceId")?;
    billing::delete_invoice(conn, &invoice_id)?;
    Ok(json!({ "ok": true }))
}

fn payments_create(
    conn: &Connection,
    sink: &dyn EventSink,
    params: &serde_json::Value,
) -> HandlerResult {
    let new = NewPayment {
        invoice_id: get_required_str(params, "invoiceId")?,
        amount: get_required_money(params, "amount")?,
        payment_date: get_required_date(params, "paymentDate")?,
        payment_method: get_required_str(params, "paymentMethod")?,
        transaction_id: get_optional_str(params, "transactionId")?,
        notes: get_optional_str(params, "notes")?,
    };
    to_json(&billing::create_payment(conn, sink, new)?)
}

fn payments_list(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let invoice_id = get_optional_str(params, "invoiceId")?;
    let payments = billing::list_payments(conn, invoice_id.as_deref())?;
    Ok(json!({ "payments": to_json(&payments)? }))
}

fn payments_get(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let payment_id = get_required_str(params, "paymentId")?;
    to_json(&billing::get_payment(conn, &payment_id)?)
}

fn payments_update(
    conn: &Connection,
    sink: &dyn EventSink,
    params: &serde_json::Value,
) -> HandlerResult {
    let payment_id = get_required_str(params, "paymentId")?;
    let payment_method = match get_optional_str(params, "paymentMethod")? {
        Some(m) if m.trim().is_empty() => {
            return Err(HandlerErr::bad_params("paymentMethod must not be empty"))
        }
        other => other,
    };
    let patch = PaymentPatch {
        amount: get_optional_money(params, "amount")?,
        payment_date: get_optional_date(params, "paymentDate")?,
        payment_method,
        transaction_id: get_patch_str(params, "transactionId")?,
        notes: get_patch_str(params, "notes")?,
    };
    to_json(&billing::update_payment(conn, sink, &payment_id, patch)?)
}

fn payments_delete(
    conn: &Connection,
    sink: &dyn EventSink,
    params: &serde_json::Value,
) -> HandlerResult {
    let payment_id = get_required_str(params, "paymentId")?;
    let rec = billing::delete_payment(conn, sink, &payment_id)?;
    Ok(json!({ "ok": true, "reconciliation": to_json(&rec)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "fees.create" => with_workspace(state, req, |conn, _, p| fees_create(conn, p)),
        "fees.list" => with_workspace(state, req, |conn, _, _| fees_list(conn)),
        "fees.update" => with_workspace(state, req, |conn, _, p| fees_update(conn, p)),
        "fees.delete" => with_workspace(state, req, |conn, _, p| fees_delete(conn, p)),
        "invoices.create" => with_workspace(state, req, |conn, _, p| invoices_create(conn, p)),
        "invoices.list" => with_workspace(state, req, |conn, _, p| invoices_list(conn, p)),
        "invoices.get" => with_workspace(state, req, |conn, _, p| invoices_get(conn, p)),
        "invoices.setStatus" => with_workspace(state, req, invoices_set_status),
        "invoices.reconcile" => with_workspace(state, req, invoices_reconcile),
        "invoices.delete" => with_workspace(state, req, |conn, _, p| invoices_delete(conn, p)),
        "payments.create" => with_workspace(state, req, payments_create),
        "payments.list" => with_workspace(state, req, |conn, _, p| payments_list(conn, p)),
        "payments.get" => with_workspace(state, req, |conn, _, p| payments_get(conn, p)),
        "payments.update" => with_workspace(state, req, payments_update),
        "payments.delete" => with_workspace(state, req, payments_delete),
        _ => return None,
    };
    Some(resp)
}
