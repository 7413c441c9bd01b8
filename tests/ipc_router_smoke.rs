mod test_support;

use serde_json::json;
use std::io::{BufRead, Write};
use test_support::{request, request_err, request_ok, spawn_sidecar, spawn_sidecar_in, temp_dir};

const METHODS: &[&str] = &[
    "students.create",
    "students.list",
    "courses.create",
    "courses.list",
    "groups.create",
    "enrollments.create",
    "enrollments.get",
    "enrollments.list",
    "fees.create",
    "fees.list",
    "fees.update",
    "fees.delete",
    "invoices.create",
    "invoices.list",
    "invoices.get",
    "invoices.setStatus",
    "invoices.reconcile",
    "invoices.delete",
    "payments.create",
    "payments.list",
    "payments.get",
    "payments.update",
    "payments.delete",
    "assignments.create",
    "exams.create",
    "submissions.list",
    "submissions.get",
    "submissions.submit",
    "submissions.grade",
    "examSubmissions.list",
    "examSubmissions.get",
    "examSubmissions.submit",
    "examSubmissions.grade",
    "progress.recompute",
    "certificates.list",
    "certificates.get",
    "certificates.create",
    "certificates.issueBulk",
    "certificates.delete",
];

#[test]
fn every_method_requires_a_workspace() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "h", "health", json!({}));
    assert!(health["workspacePath"].is_null());
    assert!(health["version"].is_string());

    for (i, method) in METHODS.iter().enumerate() {
        let resp = request(&mut stdin, &mut reader, &i.to_string(), method, json!({}));
        assert_eq!(resp["ok"], false, "{}", method);
        assert_eq!(resp["error"]["code"], "no_workspace", "{}", method);
    }
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("campusd-router-smoke");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let selected = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert!(selected["workspacePath"].is_string());
    let health = request_ok(&mut stdin, &mut reader, "h", "health", json!({}));
    assert_eq!(health["workspacePath"], selected["workspacePath"]);

    // With a workspace open, every method is routed: empty params fail
    // validation or lookup, never dispatch.
    for (i, method) in METHODS.iter().enumerate() {
        let resp = request(&mut stdin, &mut reader, &i.to_string(), method, json!({}));
        if resp["ok"] == false {
            let code = resp["error"]["code"].as_str().unwrap_or("unknown");
            assert!(
                code == "bad_params" || code == "not_found",
                "{} returned {}",
                method,
                resp
            );
        }
    }

    let unknown = request(&mut stdin, &mut reader, "u", "grades.export", json!({}));
    assert_eq!(unknown["error"]["code"], "not_implemented");

    let missing_path = request(&mut stdin, &mut reader, "p", "workspace.select", json!({}));
    assert_eq!(missing_path["error"]["code"], "bad_params");
}

#[test]
fn malformed_lines_get_bad_json_and_the_loop_continues() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    writeln!(stdin, "{{not json").expect("write");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse");
    assert_eq!(value["ok"], false);
    assert_eq!(value["error"]["code"], "bad_json");

    let health = request_ok(&mut stdin, &mut reader, "after", "health", json!({}));
    assert!(health["version"].is_string());
}

#[test]
fn startup_workspace_is_opened_and_can_be_switched() {
    let first = temp_dir("campusd-startup-ws");
    let (_child, mut stdin, mut reader) = spawn_sidecar_in(&first);

    let health = request_ok(&mut stdin, &mut reader, "h1", "health", json!({}));
    assert_eq!(health["workspacePath"], first.to_string_lossy().to_string());
    request_ok(
        &mut stdin,
        &mut reader,
        "c1",
        "courses.create",
        json!({ "name": "Algorithms" }),
    );

    // A path that can't hold a database keeps the current workspace open.
    let blocker = first.join("not-a-dir");
    std::fs::write(&blocker, b"x").expect("write file");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "bad",
        "workspace.select",
        json!({ "path": blocker.to_string_lossy() }),
    );
    assert_eq!(code, "db_open_failed");
    let courses = request_ok(&mut stdin, &mut reader, "l1", "courses.list", json!({}));
    assert_eq!(courses["courses"].as_array().map(|a| a.len()), Some(1));

    let second = temp_dir("campusd-startup-ws-next");
    let selected = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": second.to_string_lossy() }),
    );
    assert_eq!(selected["workspacePath"], second.to_string_lossy().to_string());
    let courses = request_ok(&mut stdin, &mut reader, "l2", "courses.list", json!({}));
    assert_eq!(courses["courses"].as_array().map(|a| a.len()), Some(0));
}
