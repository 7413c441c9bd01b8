//! Fee catalog, invoices and payments, plus the payment reconciler that keeps
//! an invoice's status in line with the payments recorded against it.
//!
//! Every payment mutation runs in one write transaction together with the
//! reconciliation of its parent invoice: the payment sum is read and the
//! status written under the same database write lock, so two concurrent
//! payment writers can't leave the invoice with a status computed from a stale
//! sum.

use crate::db::begin_write;
use crate::error::{EngineError, EngineResult};
use crate::events::{EngineEvent, EventSink};
use crate::values::{check_money, money_column, money_to_sql, now_rfc3339, require_student, sum_money};
use rusqlite::{Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Paid,
    Overdue,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "DRAFT",
            InvoiceStatus::Sent => "SENT",
            InvoiceStatus::Paid => "PAID",
            InvoiceStatus::Overdue => "OVERDUE",
            InvoiceStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "DRAFT" => Some(InvoiceStatus::Draft),
            "SENT" => Some(InvoiceStatus::Sent),
            "PAID" => Some(InvoiceStatus::Paid),
            "OVERDUE" => Some(InvoiceStatus::Overdue),
            "CANCELLED" => Some(InvoiceStatus::Cancelled),
            _ => None,
        }
    }

    /// Operator-set states that reconciliation never touches.
    pub fn is_operator_terminal(self) -> bool {
        matches!(self, InvoiceStatus::Draft | InvoiceStatus::Cancelled)
    }
}

/// Status transition applied by reconciliation.
///
/// DRAFT and CANCELLED are left alone. Full payment moves SENT, OVERDUE and
/// PAID to PAID. Under-payment moves PAID back to SENT and keeps OVERDUE.
pub fn next_status(current: InvoiceStatus, paid_sum: Decimal, total: Decimal) -> InvoiceStatus {
    if current.is_operator_terminal() {
        return current;
    }
    if paid_sum >= total {
        return InvoiceStatus::Paid;
    }
    match current {
        InvoiceStatus::Overdue => InvoiceStatus::Overdue,
        _ => InvoiceStatus::Sent,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Fee {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub amount: Decimal,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: String,
    pub student_id: String,
    pub issue_date: String,
    pub due_date: String,
    pub total_amount: Decimal,
    pub status: InvoiceStatus,
    pub created_at: String,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceItem {
    pub id: String,
    pub invoice_id: String,
    pub fee_id: String,
    pub description: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: String,
    pub invoice_id: String,
    pub amount: Decimal,
    pub payment_date: String,
    pub payment_method: String,
    pub transaction_id: Option<String>,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceDetail {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub items: Vec<InvoiceItem>,
    pub payments: Vec<Payment>,
    pub paid_sum: Decimal,
    pub outstanding: Decimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceStudent {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceSummary {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub student: InvoiceStudent,
    pub items: Vec<InvoiceItem>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconciliation {
    pub invoice: Invoice,
    pub previous_status: InvoiceStatus,
    pub paid_sum: Decimal,
    pub outstanding: Decimal,
}

impl Reconciliation {
    pub fn changed(&self) -> bool {
        self.previous_status != self.invoice.status
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOutcome {
    pub payment: Payment,
    pub reconciliation: Reconciliation,
}

#[derive(Debug, Clone)]
pub struct NewFee {
    pub name: String,
    pub description: Option<String>,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Default)]
pub struct FeePatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub amount: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct NewInvoiceItem {
    pub fee_id: String,
    pub description: Option<String>,
    pub amount: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub student_id: String,
    pub issue_date: String,
    pub due_date: String,
    pub items: Vec<NewInvoiceItem>,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub invoice_id: String,
    pub amount: Decimal,
    pub payment_date: String,
    pub payment_method: String,
    pub transaction_id: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PaymentPatch {
    pub amount: Option<Decimal>,
    pub payment_date: Option<String>,
    pub payment_method: Option<String>,
    pub transaction_id: Option<Option<String>>,
    pub notes: Option<Option<String>>,
}

// ---------------------------------------------------------------------------
// Fees

const FEE_COLUMNS: &str = "id, name, description, amount, created_at";

fn fee_from_row(r: &Row<'_>) -> rusqlite::Result<Fee> {
    Ok(Fee {
        id: r.get(0)?,
        name: r.get(1)?,
        description: r.get(2)?,
        amount: money_column(r, 3)?,
        created_at: r.get(4)?,
    })
}

pub fn get_fee(conn: &Connection, fee_id: &str) -> EngineResult<Fee> {
    conn.query_row(
        &format!("SELECT {FEE_COLUMNS} FROM fees WHERE id = ?"),
        [fee_id],
        fee_from_row,
    )
    .optional()?
    .ok_or_else(|| EngineError::not_found(format!("fee {fee_id}")))
}

pub fn list_fees(conn: &Connection) -> EngineResult<Vec<Fee>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {FEE_COLUMNS} FROM fees ORDER BY name COLLATE NOCASE"
    ))?;
    let fees = stmt
        .query_map([], fee_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(fees)
}

pub fn create_fee(conn: &Connection, fee: NewFee) -> EngineResult<Fee> {
    let name = fee.name.trim().to_string();
    if name.is_empty() {
        return Err(EngineError::invalid("name must not be empty"));
    }
    check_money("amount", fee.amount)?;
    let fee_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO fees(id, name, description, amount, created_at) VALUES(?, ?, ?, ?, ?)",
        (
            &fee_id,
            &name,
            &fee.description,
            money_to_sql(fee.amount),
            now_rfc3339(),
        ),
    )
    .map_err(|e| match EngineError::from(e) {
        EngineError::Conflict(_) => {
            EngineError::conflict(format!("a fee named {name:?} already exists"))
        }
        other => other,
    })?;
    get_fee(conn, &fee_id)
}

/// Edits a catalog entry. Issued invoices keep their own item amounts.
pub fn update_fee(conn: &Connection, fee_id: &str, patch: FeePatch) -> EngineResult<Fee> {
    let mut fee = get_fee(conn, fee_id)?;
    if let Some(name) = patch.name {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(EngineError::invalid("name must not be empty"));
        }
        fee.name = name;
    }
    if let Some(description) = patch.description {
        fee.description = description;
    }
    if let Some(amount) = patch.amount {
        check_money("amount", amount)?;
        fee.amount = amount;
    }
    conn.execute(
        "UPDATE fees SET name = ?, description = ?, amount = ? WHERE id = ?",
        (&fee.name, &fee.description, money_to_sql(fee.amount), fee_id),
    )?;
    Ok(fee)
}

pub fn delete_fee(conn: &Connection, fee_id: &str) -> EngineResult<()> {
    get_fee(conn, fee_id)?;
    conn.execute("DELETE FROM fees WHERE id = ?", [fee_id])
        .map_err(|e| match EngineError::from(e) {
            EngineError::Conflict(_) => {
                EngineError::conflict("fee is referenced by invoice items")
            }
            other => other,
        })?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Invoices

const INVOICE_COLUMNS: &str =
    "id, student_id, issue_date, due_date, total_amount, status, created_at, updated_at";

fn invoice_from_row(r: &Row<'_>) -> rusqlite::Result<Invoice> {
    let status_raw: String = r.get(5)?;
    let status = InvoiceStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            rusqlite::types::Type::Text,
            format!("unknown invoice status {status_raw}").into(),
        )
    })?;
    Ok(Invoice {
        id: r.get(0)?,
        student_id: r.get(1)?,
        issue_date: r.get(2)?,
        due_date: r.get(3)?,
        total_amount: money_column(r, 4)?,
        status,
        created_at: r.get(6)?,
        updated_at: r.get(7)?,
    })
}

fn load_invoice(conn: &Connection, invoice_id: &str) -> EngineResult<Invoice> {
    conn.query_row(
        &format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = ?"),
        [invoice_id],
        invoice_from_row,
    )
    .optional()?
    .ok_or_else(|| EngineError::not_found("invoice"))
}

fn load_items(conn: &Connection, invoice_id: &str) -> EngineResult<Vec<InvoiceItem>> {
    let mut stmt = conn.prepare(
        "SELECT id, invoice_id, fee_id, description, amount
         FROM invoice_items
         WHERE invoice_id = ?
         ORDER BY sort_order",
    )?;
    let items = stmt
        .query_map([invoice_id], |r| {
            Ok(InvoiceItem {
                id: r.get(0)?,
                invoice_id: r.get(1)?,
                fee_id: r.get(2)?,
                description: r.get(3)?,
                amount: money_column(r, 4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(items)
}

fn sum_payments(conn: &Connection, invoice_id: &str) -> EngineResult<Decimal> {
    let mut stmt = conn.prepare("SELECT amount FROM payments WHERE invoice_id = ?")?;
    let amounts = stmt
        .query_map([invoice_id], |r| money_column(r, 0))?
        .collect::<Result<Vec<_>, _>>()?;
    sum_money("paid amount", amounts)
}

fn outstanding(total: Decimal, paid: Decimal) -> Decimal {
    let mut d = (total - paid).max(Decimal::ZERO);
    d.rescale(crate::values::MONEY_SCALE);
    d
}

pub fn get_invoice(conn: &Connection, invoice_id: &str) -> EngineResult<InvoiceDetail> {
    let invoice = load_invoice(conn, invoice_id)?;
    let items = load_items(conn, invoice_id)?;
    let payments = list_payments(conn, Some(invoice_id))?;
    let paid_sum = sum_money("paid amount", payments.iter().map(|p| p.amount))?;
    Ok(InvoiceDetail {
        outstanding: outstanding(invoice.total_amount, paid_sum),
        invoice,
        items,
        payments,
        paid_sum,
    })
}

/// Invoice listing: every invoice with its student's contact fields and
/// its line items, newest first.
pub fn list_invoices(
    conn: &Connection,
    student_id: Option<&str>,
) -> EngineResult<Vec<InvoiceSummary>> {
    let mut stmt = conn.prepare(
        "SELECT i.id, i.student_id, i.issue_date, i.due_date, i.total_amount, i.status,
                i.created_at, i.updated_at, s.first_name, s.last_name, s.email
         FROM invoices i
         JOIN students s ON s.id = i.student_id
         WHERE (?1 IS NULL OR i.student_id = ?1)
         ORDER BY i.issue_date DESC, i.rowid DESC",
    )?;
    let rows = stmt
        .query_map([student_id], |r| {
            Ok((
                invoice_from_row(r)?,
                InvoiceStudent {
                    first_name: r.get(8)?,
                    last_name: r.get(9)?,
                    email: r.get(10)?,
                },
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::with_capacity(rows.len());
    for (invoice, student) in rows {
        let items = load_items(conn, &invoice.id)?;
        out.push(InvoiceSummary {
            invoice,
            student,
            items,
        });
    }
    Ok(out)
}

/// Creates an invoice and its items atomically. The total is fixed here as
/// the sum of the item amounts; initial status is SENT.
pub fn create_invoice(conn: &Connection, new: NewInvoice) -> EngineResult<InvoiceDetail> {
    if new.items.is_empty() {
        return Err(EngineError::invalid("items must not be empty"));
    }
    if new.due_date < new.issue_date {
        return Err(EngineError::invalid("dueDate must not be before issueDate"));
    }

    let tx = begin_write(conn)?;
    require_student(&tx, &new.student_id)?;

    let mut resolved: Vec<(String, String, Decimal)> = Vec::with_capacity(new.items.len());
    for item in &new.items {
        let fee = get_fee(&tx, &item.fee_id)?;
        let description = item
            .description
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or(fee.name);
        let amount = item.amount.unwrap_or(fee.amount);
        check_money("item amount", amount)?;
        resolved.push((fee.id, description, amount));
    }
    let total = sum_money("totalAmount", resolved.iter().map(|(_, _, amount)| *amount))?;

    let invoice_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO invoices(id, student_id, issue_date, due_date, total_amount, status, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &invoice_id,
            &new.student_id,
            &new.issue_date,
            &new.due_date,
            money_to_sql(total),
            InvoiceStatus::Sent.as_str(),
            now_rfc3339(),
        ),
    )?;
    for (i, (fee_id, description, amount)) in resolved.iter().enumerate() {
        tx.execute(
            "INSERT INTO invoice_items(id, invoice_id, fee_id, description, amount, sort_order)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                &invoice_id,
                fee_id,
                description,
                money_to_sql(*amount),
                i as i64,
            ),
        )?;
    }
    tx.commit()?;

    tracing::info!(invoice_id = %invoice_id, student_id = %new.student_id, total = %total, "invoice created");
    get_invoice(conn, &invoice_id)
}

/// Operator override. This is the only path that writes DRAFT or CANCELLED.
///
/// PAID, SENT and OVERDUE must agree with the recorded payments: PAID needs
/// the total covered, SENT and OVERDUE need a balance left.
pub fn set_invoice_status(
    conn: &Connection,
    sink: &dyn EventSink,
    invoice_id: &str,
    status: InvoiceStatus,
) -> EngineResult<Invoice> {
    let tx = begin_write(conn)?;
    let mut invoice = load_invoice(&tx, invoice_id)?;
    let previous = invoice.status;
    if previous == status {
        return Ok(invoice);
    }
    let paid_sum = sum_payments(&tx, invoice_id)?;
    let settled = paid_sum >= invoice.total_amount;
    match status {
        InvoiceStatus::Paid if !settled => {
            return Err(EngineError::invalid(format!(
                "invoice is not fully paid ({paid_sum} of {})",
                invoice.total_amount
            )));
        }
        InvoiceStatus::Sent | InvoiceStatus::Overdue if settled => {
            return Err(EngineError::invalid(format!(
                "invoice is fully paid; cannot mark it {}",
                status.as_str()
            )));
        }
        _ => {}
    }
    let now = now_rfc3339();
    tx.execute(
        "UPDATE invoices SET status = ?, updated_at = ? WHERE id = ?",
        (status.as_str(), &now, invoice_id),
    )?;
    tx.commit()?;

    invoice.status = status;
    invoice.updated_at = Some(now);
    tracing::info!(invoice_id = %invoice_id, from = previous.as_str(), to = status.as_str(), "invoice status set");
    sink.emit(&EngineEvent::InvoiceStatusChanged {
        invoice_id: invoice.id.clone(),
        student_id: invoice.student_id.clone(),
        from: previous,
        to: status,
    });
    Ok(invoice)
}

/// Removes an invoice together with its payments and items.
pub fn delete_invoice(conn: &Connection, invoice_id: &str) -> EngineResult<()> {
    let tx = begin_write(conn)?;
    load_invoice(&tx, invoice_id)?;
    tx.execute("DELETE FROM payments WHERE invoice_id = ?", [invoice_id])?;
    tx.execute("DELETE FROM invoice_items WHERE invoice_id = ?", [invoice_id])?;
    tx.execute("DELETE FROM invoices WHERE id = ?", [invoice_id])?;
    tx.commit()?;
    tracing::info!(invoice_id = %invoice_id, "invoice deleted");
    Ok(())
}

// ---------------------------------------------------------------------------
// Reconciliation

/// Recomputes the invoice status from its payments. Must run inside the
/// caller's write transaction.
fn reconcile_in(conn: &Connection, invoice_id: &str) -> EngineResult<Reconciliation> {
    let mut invoice = load_invoice(conn, invoice_id)?;
    let paid_sum = sum_payments(conn, invoice_id)?;
    let previous_status = invoice.status;
    let next = next_status(previous_status, paid_sum, invoice.total_amount);

    if next != previous_status {
        let now = now_rfc3339();
        let changed = conn.execute(
            "UPDATE invoices SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
            (next.as_str(), &now, invoice_id, previous_status.as_str()),
        )?;
        if changed != 1 {
            return Err(EngineError::conflict("invoice status changed during reconciliation"));
        }
        invoice.status = next;
        invoice.updated_at = Some(now);
    }

    Ok(Reconciliation {
        outstanding: outstanding(invoice.total_amount, paid_sum),
        invoice,
        previous_status,
        paid_sum,
    })
}

fn announce(sink: &dyn EventSink, rec: &Reconciliation) {
    if !rec.changed() {
        return;
    }
    tracing::info!(
        invoice_id = %rec.invoice.id,
        from = rec.previous_status.as_str(),
        to = rec.invoice.status.as_str(),
        paid = %rec.paid_sum,
        total = %rec.invoice.total_amount,
        "invoice status reconciled"
    );
    sink.emit(&EngineEvent::InvoiceStatusChanged {
        invoice_id: rec.invoice.id.clone(),
        student_id: rec.invoice.student_id.clone(),
        from: rec.previous_status,
        to: rec.invoice.status,
    });
}

pub fn reconcile(
    conn: &Connection,
    sink: &dyn EventSink,
    invoice_id: &str,
) -> EngineResult<Reconciliation> {
    let tx = begin_write(conn)?;
    let rec = reconcile_in(&tx, invoice_id)?;
    tx.commit()?;
    announce(sink, &rec);
    Ok(rec)
}

// ---------------------------------------------------------------------------
// Payments

const PAYMENT_COLUMNS: &str = "id, invoice_id, amount, payment_date, payment_method, \
                               transaction_id, notes, created_at, updated_at";

fn payment_from_row(r: &Row<'_>) -> rusqlite::Result<Payment> {
    Ok(Payment {
        id: r.get(0)?,
        invoice_id: r.get(1)?,
        amount: money_column(r, 2)?,
        payment_date: r.get(3)?,
        payment_method: r.get(4)?,
        transaction_id: r.get(5)?,
        notes: r.get(6)?,
        created_at: r.get(7)?,
        updated_at: r.get(8)?,
    })
}

pub fn get_payment(conn: &Connection, payment_id: &str) -> EngineResult<Payment> {
    conn.query_row(
        &format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = ?"),
        [payment_id],
        payment_from_row,
    )
    .optional()?
    .ok_or_else(|| EngineError::not_found("payment"))
}

pub fn list_payments(conn: &Connection, invoice_id: Option<&str>) -> EngineResult<Vec<Payment>> {
    let payments = match invoice_id {
        Some(iid) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PAYMENT_COLUMNS} FROM payments
                 WHERE invoice_id = ?
                 ORDER BY payment_date, rowid"
            ))?;
            let rows = stmt
                .query_map([iid], payment_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PAYMENT_COLUMNS} FROM payments ORDER BY payment_date DESC, rowid DESC"
            ))?;
            let rows = stmt
                .query_map([], payment_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
    };
    Ok(payments)
}

fn validate_payment_amount(amount: Decimal) -> EngineResult<()> {
    if amount <= Decimal::ZERO {
        return Err(EngineError::invalid("amount must be greater than zero"));
    }
    check_money("amount", amount)
}

fn validate_method(method: &str) -> EngineResult<()> {
    if method.trim().is_empty() {
        return Err(EngineError::invalid("paymentMethod must not be empty"));
    }
    Ok(())
}

pub fn create_payment(
    conn: &Connection,
    sink: &dyn EventSink,
    new: NewPayment,
) -> EngineResult<PaymentOutcome> {
    validate_payment_amount(new.amount)?;
    validate_method(&new.payment_method)?;

    let tx = begin_write(conn)?;
    load_invoice(&tx, &new.invoice_id)?;
    let payment_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO payments(id, invoice_id, amount, payment_date, payment_method, transaction_id, notes, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &payment_id,
            &new.invoice_id,
            money_to_sql(new.amount),
            &new.payment_date,
            new.payment_method.trim(),
            &new.transaction_id,
            &new.notes,
            now_rfc3339(),
        ),
    )?;
    let reconciliation = reconcile_in(&tx, &new.invoice_id)?;
    let payment = get_payment(&tx, &payment_id)?;
    tx.commit()?;

    tracing::info!(payment_id = %payment_id, invoice_id = %new.invoice_id, amount = %new.amount, "payment recorded");
    announce(sink, &reconciliation);
    Ok(PaymentOutcome {
        payment,
        reconciliation,
    })
}

pub fn update_payment(
    conn: &Connection,
    sink: &dyn EventSink,
    payment_id: &str,
    patch: PaymentPatch,
) -> EngineResult<PaymentOutcome> {
    let tx = begin_write(conn)?;
    let mut payment = get_payment(&tx, payment_id)?;
    if let Some(amount) = patch.amount {
        validate_payment_amount(amount)?;
        payment.amount = amount;
    }
    if let Some(date) = patch.payment_date {
        payment.payment_date = date;
    }
    if let Some(method) = patch.payment_method {
        validate_method(&method)?;
        payment.payment_method = method.trim().to_string();
    }
    if let Some(transaction_id) = patch.transaction_id {
        payment.transaction_id = transaction_id;
    }
    if let Some(notes) = patch.notes {
        payment.notes = notes;
    }
    let now = now_rfc3339();
    tx.execute(
        "UPDATE payments
         SET amount = ?, payment_date = ?, payment_method = ?, transaction_id = ?, notes = ?, updated_at = ?
         WHERE id = ?",
        (
            money_to_sql(payment.amount),
            &payment.payment_date,
            &payment.payment_method,
            &payment.transaction_id,
            &payment.notes,
            &now,
            payment_id,
        ),
    )?;
    payment.updated_at = Some(now);
    let reconciliation = reconcile_in(&tx, &payment.invoice_id)?;
    tx.commit()?;

    tracing::info!(payment_id = %payment_id, invoice_id = %payment.invoice_id, "payment updated");
    announce(sink, &reconciliation);
    Ok(PaymentOutcome {
        payment,
        reconciliation,
    })
}

pub fn delete_payment(
    conn: &Connection,
    sink: &dyn EventSink,
    payment_id: &str,
) -> EngineResult<Reconciliation> {
    let tx = begin_write(conn)?;
    let payment = get_payment(&tx, payment_id)?;
    tx.execute("DELETE FROM payments WHERE id = ?", [payment_id])?;
    let reconciliation = reconcile_in(&tx, &payment.invoice_id)?;
    tx.commit()?;

    tracing::info!(payment_id = %payment_id, invoice_id = %payment.invoice_id, "payment deleted");
    announce(sink, &reconciliation);
    Ok(reconciliation)
}
