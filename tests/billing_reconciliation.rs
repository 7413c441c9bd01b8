mod test_support;

use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};
use test_support::{request_err, request_ok, spawn_sidecar, str_field, temp_dir};

type Io = (ChildStdin, BufReader<ChildStdout>);

/// Opens a fresh workspace with one student and a 100.00 tuition fee.
/// Returns (studentId, feeId).
fn seed(io: &mut Io, prefix: &str) -> (String, String) {
    let (stdin, reader) = io;
    let workspace = temp_dir(prefix);
    request_ok(
        stdin,
        reader,
        "seed-ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let student = request_ok(
        stdin,
        reader,
        "seed-student",
        "students.create",
        json!({ "firstName": "Ada", "lastName": "Lovelace" }),
    );
    let fee = request_ok(
        stdin,
        reader,
        "seed-fee",
        "fees.create",
        json!({ "name": "Tuition", "amount": "100.00" }),
    );
    (str_field(&student, "id"), str_field(&fee, "id"))
}

fn create_invoice(io: &mut Io, id: &str, student_id: &str, fee_id: &str) -> serde_json::Value {
    let (stdin, reader) = io;
    request_ok(
        stdin,
        reader,
        id,
        "invoices.create",
        json!({
            "studentId": student_id,
            "issueDate": "2024-09-01",
            "dueDate": "2024-09-30",
            "items": [{ "feeId": fee_id }]
        }),
    )
}

fn pay(io: &mut Io, id: &str, invoice_id: &str, amount: &str) -> serde_json::Value {
    let (stdin, reader) = io;
    request_ok(
        stdin,
        reader,
        id,
        "payments.create",
        json!({
            "invoiceId": invoice_id,
            "amount": amount,
            "paymentDate": "2024-09-10",
            "paymentMethod": "CARD"
        }),
    )
}

fn status_of(io: &mut Io, id: &str, invoice_id: &str) -> String {
    let (stdin, reader) = io;
    let inv = request_ok(stdin, reader, id, "invoices.get", json!({ "invoiceId": invoice_id }));
    str_field(&inv, "status")
}

#[test]
fn partial_then_full_payment_then_deletion_tracks_status() {
    let (_child, stdin, reader) = spawn_sidecar();
    let mut io = (stdin, reader);
    let (student_id, fee_id) = seed(&mut io, "campusd-billing-flow");

    let invoice = create_invoice(&mut io, "1", &student_id, &fee_id);
    let invoice_id = str_field(&invoice, "id");
    assert_eq!(invoice["status"], "SENT");
    assert_eq!(invoice["totalAmount"], "100.00");
    assert_eq!(invoice["items"][0]["description"], "Tuition");
    assert_eq!(invoice["items"][0]["amount"], "100.00");

    let first = pay(&mut io, "2", &invoice_id, "60.00");
    assert_eq!(first["reconciliation"]["invoice"]["status"], "SENT");
    assert_eq!(first["reconciliation"]["paidSum"], "60.00");
    assert_eq!(first["reconciliation"]["outstanding"], "40.00");

    let second = pay(&mut io, "3", &invoice_id, "40.00");
    let second_payment_id = str_field(&second["payment"], "id");
    assert_eq!(second["reconciliation"]["previousStatus"], "SENT");
    assert_eq!(second["reconciliation"]["invoice"]["status"], "PAID");
    assert_eq!(status_of(&mut io, "4", &invoice_id), "PAID");

    let (stdin, reader) = &mut io;
    let deleted = request_ok(
        stdin,
        reader,
        "5",
        "payments.delete",
        json!({ "paymentId": second_payment_id }),
    );
    assert_eq!(deleted["reconciliation"]["invoice"]["status"], "SENT");
    assert_eq!(deleted["reconciliation"]["paidSum"], "60.00");

    let detail = request_ok(stdin, reader, "6", "invoices.get", json!({ "invoiceId": invoice_id }));
    assert_eq!(detail["payments"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(detail["outstanding"], "40.00");
}

#[test]
fn overpayment_marks_paid_and_outstanding_never_negative() {
    let (_child, stdin, reader) = spawn_sidecar();
    let mut io = (stdin, reader);
    let (student_id, fee_id) = seed(&mut io, "campusd-billing-overpay");
    let invoice_id = str_field(&create_invoice(&mut io, "1", &student_id, &fee_id), "id");

    let out = pay(&mut io, "2", &invoice_id, "150");
    assert_eq!(out["payment"]["amount"], "150.00");
    assert_eq!(out["reconciliation"]["invoice"]["status"], "PAID");
    assert_eq!(out["reconciliation"]["outstanding"], "0.00");
}

#[test]
fn reconcile_without_payments_is_a_stable_no_op() {
    let (_child, stdin, reader) = spawn_sidecar();
    let mut io = (stdin, reader);
    let (student_id, fee_id) = seed(&mut io, "campusd-billing-noop");
    let invoice_id = str_field(&create_invoice(&mut io, "1", &student_id, &fee_id), "id");

    let (stdin, reader) = &mut io;
    for id in ["2", "3"] {
        let rec = request_ok(
            stdin,
            reader,
            id,
            "invoices.reconcile",
            json!({ "invoiceId": invoice_id }),
        );
        assert_eq!(rec["invoice"]["status"], "SENT");
        assert_eq!(rec["paidSum"], "0.00");
        assert_eq!(rec["changed"], false);
    }
}

#[test]
fn operator_statuses_survive_payment_changes() {
    let (_child, stdin, reader) = spawn_sidecar();
    let mut io = (stdin, reader);
    let (student_id, fee_id) = seed(&mut io, "campusd-billing-operator");

    let cancelled = str_field(&create_invoice(&mut io, "1", &student_id, &fee_id), "id");
    let overdue = str_field(&create_invoice(&mut io, "2", &student_id, &fee_id), "id");
    {
        let (stdin, reader) = &mut io;
        request_ok(
            stdin,
            reader,
            "3",
            "invoices.setStatus",
            json!({ "invoiceId": cancelled, "status": "CANCELLED" }),
        );
        request_ok(
            stdin,
            reader,
            "4",
            "invoices.setStatus",
            json!({ "invoiceId": overdue, "status": "OVERDUE" }),
        );
    }

    let out = pay(&mut io, "5", &cancelled, "100.00");
    assert_eq!(out["reconciliation"]["invoice"]["status"], "CANCELLED");

    let partial = pay(&mut io, "6", &overdue, "10.00");
    assert_eq!(partial["reconciliation"]["invoice"]["status"], "OVERDUE");
    let rest = pay(&mut io, "7", &overdue, "90.00");
    assert_eq!(rest["reconciliation"]["invoice"]["status"], "PAID");

    let (stdin, reader) = &mut io;
    let code = request_err(
        stdin,
        reader,
        "8",
        "invoices.setStatus",
        json!({ "invoiceId": overdue, "status": "SETTLED" }),
    );
    assert_eq!(code, "bad_params");

    // A settled invoice can't be pushed back to a state that claims a balance.
    let code = request_err(
        stdin,
        reader,
        "9",
        "invoices.setStatus",
        json!({ "invoiceId": overdue, "status": "OVERDUE" }),
    );
    assert_eq!(code, "bad_params");
    assert_eq!(status_of(&mut io, "10", &overdue), "PAID");
}

#[test]
fn payment_updates_reconcile_the_invoice() {
    let (_child, stdin, reader) = spawn_sidecar();
    let mut io = (stdin, reader);
    let (student_id, fee_id) = seed(&mut io, "campusd-billing-update");
    let invoice_id = str_field(&create_invoice(&mut io, "1", &student_id, &fee_id), "id");
    let payment_id = str_field(&pay(&mut io, "2", &invoice_id, "20.00")["payment"], "id");

    let (stdin, reader) = &mut io;
    let up = request_ok(
        stdin,
        reader,
        "3",
        "payments.update",
        json!({ "paymentId": payment_id, "amount": 100, "notes": "corrected" }),
    );
    assert_eq!(up["payment"]["amount"], "100.00");
    assert_eq!(up["payment"]["notes"], "corrected");
    assert_eq!(up["reconciliation"]["invoice"]["status"], "PAID");

    let down = request_ok(
        stdin,
        reader,
        "4",
        "payments.update",
        json!({ "paymentId": payment_id, "amount": "99.99", "notes": null }),
    );
    assert_eq!(down["payment"]["notes"], serde_json::Value::Null);
    assert_eq!(down["reconciliation"]["invoice"]["status"], "SENT");
    assert_eq!(down["reconciliation"]["outstanding"], "0.01");
}

#[test]
fn invalid_payments_are_rejected_without_side_effects() {
    let (_child, stdin, reader) = spawn_sidecar();
    let mut io = (stdin, reader);
    let (student_id, fee_id) = seed(&mut io, "campusd-billing-invalid");
    let invoice_id = str_field(&create_invoice(&mut io, "1", &student_id, &fee_id), "id");

    let (stdin, reader) = &mut io;
    let base = json!({
        "invoiceId": invoice_id,
        "paymentDate": "2024-09-10",
        "paymentMethod": "CASH"
    });
    let cases = [
        ("2", json!({ "amount": "abc" }), "bad_params"),
        ("3", json!({ "amount": "0" }), "bad_params"),
        ("4", json!({ "amount": "-5" }), "bad_params"),
        ("5", json!({ "amount": "1.005" }), "bad_params"),
        ("6", json!({ "amount": "5", "paymentDate": "10/09/2024" }), "bad_params"),
        ("7", json!({ "amount": "5", "invoiceId": "missing" }), "not_found"),
        ("8", json!({ "amount": "1000000000000.01" }), "bad_params"),
        ("9", json!({ "amount": "79228162514264337593543950335" }), "bad_params"),
        ("10", json!({ "amount": 1e300 }), "bad_params"),
    ];
    for (id, overrides, expected) in cases {
        let mut params = base.clone();
        for (k, v) in overrides.as_object().expect("object") {
            params[k.as_str()] = v.clone();
        }
        let code = request_err(stdin, reader, id, "payments.create", params);
        assert_eq!(code, expected, "case {}", id);
    }

    let list = request_ok(stdin, reader, "11", "payments.list", json!({ "invoiceId": invoice_id }));
    assert_eq!(list["payments"].as_array().map(|a| a.len()), Some(0));

    // The sidecar is still serving after the oversized amounts.
    let health = request_ok(stdin, reader, "12", "health", json!({}));
    assert!(health["version"].is_string());
}

#[test]
fn deleting_an_invoice_cascades_to_payments_and_items() {
    let (_child, stdin, reader) = spawn_sidecar();
    let mut io = (stdin, reader);
    let (student_id, fee_id) = seed(&mut io, "campusd-billing-cascade");
    let invoice_id = str_field(&create_invoice(&mut io, "1", &student_id, &fee_id), "id");
    let payment_id = str_field(&pay(&mut io, "2", &invoice_id, "30.00")["payment"], "id");

    let (stdin, reader) = &mut io;
    request_ok(stdin, reader, "3", "invoices.delete", json!({ "invoiceId": invoice_id }));
    assert_eq!(
        request_err(stdin, reader, "4", "invoices.get", json!({ "invoiceId": invoice_id })),
        "not_found"
    );
    assert_eq!(
        request_err(stdin, reader, "5", "payments.get", json!({ "paymentId": payment_id })),
        "not_found"
    );

    // Fee is no longer referenced, so it can go too.
    request_ok(stdin, reader, "6", "fees.delete", json!({ "feeId": fee_id }));
}

#[test]
fn fee_catalog_enforces_names_and_references() {
    let (_child, stdin, reader) = spawn_sidecar();
    let mut io = (stdin, reader);
    let (student_id, fee_id) = seed(&mut io, "campusd-billing-fees");
    create_invoice(&mut io, "1", &student_id, &fee_id);

    let (stdin, reader) = &mut io;
    assert_eq!(
        request_err(
            stdin,
            reader,
            "2",
            "fees.create",
            json!({ "name": "Tuition", "amount": "5.00" })
        ),
        "conflict"
    );
    assert_eq!(
        request_err(stdin, reader, "3", "fees.delete", json!({ "feeId": fee_id })),
        "conflict"
    );

    let updated = request_ok(
        stdin,
        reader,
        "4",
        "fees.update",
        json!({ "feeId": fee_id, "amount": "120.00", "description": "Autumn term" }),
    );
    assert_eq!(updated["amount"], "120.00");
    assert_eq!(updated["description"], "Autumn term");

    // Existing invoices keep the total fixed at creation time.
    let invoices = request_ok(stdin, reader, "5", "invoices.list", json!({ "studentId": student_id }));
    let rows = invoices["invoices"].as_array().expect("invoices");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["totalAmount"], "100.00");
    assert_eq!(rows[0]["student"]["firstName"], "Ada");
    assert_eq!(rows[0]["student"]["lastName"], "Lovelace");
    let items = rows[0]["items"].as_array().expect("items");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["feeId"], fee_id.as_str());
    assert_eq!(items[0]["amount"], "100.00");

    let fees = request_ok(stdin, reader, "6", "fees.list", json!({}));
    assert_eq!(fees["fees"].as_array().map(|a| a.len()), Some(1));
}
