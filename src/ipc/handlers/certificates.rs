use rusqlite::Connection;
use serde_json::json;

use crate::certificates::{self, BulkIssue, CertificateFilter, ManualCertificate};
use crate::ipc::helpers::{
    get_optional_date, get_optional_str, get_required_date, get_required_str, get_string_array,
    to_json, with_workspace, HandlerResult,
};
use crate::ipc::types::{AppState, Request};

fn certificates_list(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let filter = CertificateFilter {
        course_id: get_optional_str(params, "courseId")?,
        student_id: get_optional_str(params, "studentId")?,
    };
    let rows = certificates::list_certificates(conn, &filter)?;
    Ok(json!({ "certificates": to_json(&rows)? }))
}

fn certificates_get(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let certificate_id = get_required_str(params, "certificateId")?;
    to_json(&certificates::get_certificate(conn, &certificate_id)?)
}

fn certificates_create(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let manual = ManualCertificate {
        recipient: get_optional_str(params, "recipient")?,
        course_id: get_required_str(params, "courseId")?,
        student_id: get_optional_str(params, "studentId")?,
        issue_date: get_required_date(params, "issueDate")?,
        expiry_date: get_optional_date(params, "expiryDate")?,
        unique_id: get_optional_str(params, "uniqueId")?.filter(|s| !s.trim().is_empty()),
    };
    to_json(&certificates::create_certificate(conn, manual)?)
}

fn certificates_issue_bulk(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let bulk = BulkIssue {
        course_id: get_required_str(params, "courseId")?,
        issue_date: get_required_date(params, "issueDate")?,
        expiry_date: get_optional_date(params, "expiryDate")?,
        student_ids: get_string_array(params, "studentIds")?,
    };
    let count = certificates::issue_bulk(conn, bulk)?;
    Ok(json!({ "count": count }))
}

fn certificates_delete(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let certificate_id = get_required_str(params, "certificateId")?;
    certificates::delete_certificate(conn, &certificate_id)?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "certificates.list" => with_workspace(state, req, |conn, _, p| certificates_list(conn, p)),
        "certificates.get" => with_workspace(state, req, |conn, _, p| certificates_get(conn, p)),
        "certificates.create" => {
            with_workspace(state, req, |conn, _, p| certificates_create(conn, p))
        }
        "certificates.issueBulk" => {
            with_workspace(state, req, |conn, _, p| certificates_issue_bulk(conn, p))
        }
        "certificates.delete" => {
            with_workspace(state, req, |conn, _, p| certificates_delete(conn, p))
        }
        _ => return None,
    };
    Some(resp)
}
