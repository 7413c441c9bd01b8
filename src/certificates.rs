//! Course completion certificates.
//!
//! Two issuance paths exist. The completion trigger runs inside a progress
//! recompute and creates at most one automatically issued certificate per
//! (student, course); the partial unique index `idx_certificates_auto_once`
//! is what enforces that, so a retried or concurrent recompute can't double
//! issue. The operator paths (single and bulk) are explicit re-issues and are
//! not deduplicated.
//!
//! Certificates are achievement records: nothing in the engine updates or
//! revokes them after creation.

use crate::db::begin_write;
use crate::error::{EngineError, EngineResult};
use crate::values::{now_rfc3339, require_course, student_display_name, today};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Rows per INSERT statement in a bulk issue, kept well under SQLite's
/// bound-parameter limit.
const BULK_CHUNK_ROWS: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub id: String,
    pub recipient: String,
    pub course_id: String,
    pub course_name: String,
    pub student_id: Option<String>,
    pub issue_date: String,
    pub expiry_date: Option<String>,
    pub unique_id: Option<String>,
    pub auto_issued: bool,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct ManualCertificate {
    pub recipient: Option<String>,
    pub course_id: String,
    pub student_id: Option<String>,
    pub issue_date: String,
    pub expiry_date: Option<String>,
    pub unique_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BulkIssue {
    pub course_id: String,
    pub issue_date: String,
    pub expiry_date: Option<String>,
    pub student_ids: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CertificateFilter {
    pub course_id: Option<String>,
    pub student_id: Option<String>,
}

/// Public verification code: `CERT-` and 16 hex digits of
/// SHA-256(student|course|salt).
pub fn certificate_unique_id(student_id: &str, course_id: &str, salt: &str) -> String {
    let digest = Sha256::digest(format!("{student_id}|{course_id}|{salt}").as_bytes());
    let hex: String = digest.iter().take(8).map(|b| format!("{b:02X}")).collect();
    format!("CERT-{hex}")
}

const CERT_SELECT: &str = "SELECT c.id, c.recipient, c.course_id, co.name, c.student_id, c.issue_date,
        c.expiry_date, c.unique_id, c.auto_issued, c.created_at
 FROM certificates c
 JOIN courses co ON co.id = c.course_id";

fn certificate_from_row(r: &Row<'_>) -> rusqlite::Result<Certificate> {
    Ok(Certificate {
        id: r.get(0)?,
        recipient: r.get(1)?,
        course_id: r.get(2)?,
        course_name: r.get(3)?,
        student_id: r.get(4)?,
        issue_date: r.get(5)?,
        expiry_date: r.get(6)?,
        unique_id: r.get(7)?,
        auto_issued: r.get::<_, i64>(8)? != 0,
        created_at: r.get(9)?,
    })
}

pub fn get_certificate(conn: &Connection, certificate_id: &str) -> EngineResult<Certificate> {
    conn.query_row(
        &format!("{CERT_SELECT} WHERE c.id = ?"),
        [certificate_id],
        certificate_from_row,
    )
    .optional()?
    .ok_or_else(|| EngineError::not_found("certificate"))
}

pub fn list_certificates(
    conn: &Connection,
    filter: &CertificateFilter,
) -> EngineResult<Vec<Certificate>> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut bind: Vec<Value> = Vec::new();
    if let Some(cid) = &filter.course_id {
        clauses.push("c.course_id = ?");
        bind.push(Value::Text(cid.clone()));
    }
    if let Some(sid) = &filter.student_id {
        clauses.push("c.student_id = ?");
        bind.push(Value::Text(sid.clone()));
    }
    let mut sql = CERT_SELECT.to_string();
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY c.issue_date DESC, c.rowid DESC");

    let mut stmt = conn.prepare(&sql)?;
    let certs = stmt
        .query_map(params_from_iter(bind), certificate_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(certs)
}

/// Completion trigger. Issues the automatic certificate when `progress`
/// reaches 100 and none exists yet for the pair; returns it only when this
/// call created it. Runs inside the recompute transaction.
pub fn issue_on_completion(
    conn: &Connection,
    student_id: &str,
    course_id: &str,
    progress: i64,
) -> EngineResult<Option<Certificate>> {
    if progress < 100 {
        return Ok(None);
    }
    let recipient = student_display_name(conn, student_id)?;
    let created_at = now_rfc3339();
    let certificate_id = Uuid::new_v4().to_string();
    let unique_id = certificate_unique_id(student_id, course_id, &created_at);

    let inserted = conn.execute(
        "INSERT INTO certificates(id, recipient, course_id, student_id, issue_date, unique_id, auto_issued, created_at)
         VALUES(?, ?, ?, ?, ?, ?, 1, ?)
         ON CONFLICT(student_id, course_id) WHERE auto_issued = 1 DO NOTHING",
        (
            &certificate_id,
            &recipient,
            course_id,
            student_id,
            today(),
            &unique_id,
            &created_at,
        ),
    )?;
    if inserted == 0 {
        return Ok(None);
    }
    get_certificate(conn, &certificate_id).map(Some)
}

fn validate_dates(issue_date: &str, expiry_date: Option<&str>) -> EngineResult<()> {
    if let Some(expiry) = expiry_date {
        if expiry < issue_date {
            return Err(EngineError::invalid("expiryDate must not be before issueDate"));
        }
    }
    Ok(())
}

/// Operator issuance of a single certificate.
pub fn create_certificate(conn: &Connection, manual: ManualCertificate) -> EngineResult<Certificate> {
    validate_dates(&manual.issue_date, manual.expiry_date.as_deref())?;
    require_course(conn, &manual.course_id)?;

    let given = manual
        .recipient
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let recipient = match (given, manual.student_id.as_deref()) {
        (Some(name), _) => name,
        (None, Some(sid)) => student_display_name(conn, sid)?,
        (None, None) => {
            return Err(EngineError::invalid("recipient or studentId is required"));
        }
    };
    if let Some(sid) = manual.student_id.as_deref() {
        crate::values::require_student(conn, sid)?;
    }

    let certificate_id = Uuid::new_v4().to_string();
    let unique_id = manual.unique_id.unwrap_or_else(|| {
        certificate_unique_id(
            manual.student_id.as_deref().unwrap_or(&recipient),
            &manual.course_id,
            &certificate_id,
        )
    });
    conn.execute(
        "INSERT INTO certificates(id, recipient, course_id, student_id, issue_date, expiry_date, unique_id, auto_issued, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, 0, ?)",
        (
            &certificate_id,
            &recipient,
            &manual.course_id,
            &manual.student_id,
            &manual.issue_date,
            &manual.expiry_date,
            &unique_id,
            now_rfc3339(),
        ),
    )?;
    get_certificate(conn, &certificate_id)
}

/// Operator bulk issuance: one certificate per student id, all or nothing.
/// Returns the number of certificates created.
pub fn issue_bulk(conn: &Connection, bulk: BulkIssue) -> EngineResult<usize> {
    if bulk.course_id.trim().is_empty() {
        return Err(EngineError::invalid("courseId is required"));
    }
    if bulk.student_ids.is_empty() {
        return Err(EngineError::invalid("studentIds must not be empty"));
    }
    validate_dates(&bulk.issue_date, bulk.expiry_date.as_deref())?;

    let tx = begin_write(conn)?;
    require_course(&tx, &bulk.course_id)?;

    let created_at = now_rfc3339();
    let mut rows: Vec<[Value; 8]> = Vec::with_capacity(bulk.student_ids.len());
    for student_id in &bulk.student_ids {
        let recipient = student_display_name(&tx, student_id).map_err(|e| match e {
            EngineError::NotFound(_) => EngineError::not_found(format!("student {student_id}")),
            other => other,
        })?;
        let certificate_id = Uuid::new_v4().to_string();
        let unique_id = certificate_unique_id(student_id, &bulk.course_id, &certificate_id);
        rows.push([
            Value::Text(certificate_id),
            Value::Text(recipient),
            Value::Text(bulk.course_id.clone()),
            Value::Text(student_id.clone()),
            Value::Text(bulk.issue_date.clone()),
            bulk.expiry_date
                .clone()
                .map(Value::Text)
                .unwrap_or(Value::Null),
            Value::Text(unique_id),
            Value::Text(created_at.clone()),
        ]);
    }

    let mut count = 0usize;
    for chunk in rows.chunks(BULK_CHUNK_ROWS) {
        let placeholders = vec!["(?, ?, ?, ?, ?, ?, ?, 0, ?)"; chunk.len()].join(", ");
        let sql = format!(
            "INSERT INTO certificates(id, recipient, course_id, student_id, issue_date, expiry_date, unique_id, auto_issued, created_at)
             VALUES {placeholders}"
        );
        count += tx.execute(&sql, params_from_iter(chunk.iter().flatten()))?;
    }
    tx.commit()?;

    tracing::info!(course_id = %bulk.course_id, count, "certificates issued in bulk");
    Ok(count)
}

pub fn delete_certificate(conn: &Connection, certificate_id: &str) -> EngineResult<()> {
    let deleted = conn.execute("DELETE FROM certificates WHERE id = ?", [certificate_id])?;
    if deleted == 0 {
        return Err(EngineError::not_found("certificate"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory;

    fn seed(conn: &Connection) {
        for sql in [
            "INSERT INTO students(id, first_name, last_name, created_at) VALUES('s1', 'Alan', 'Turing', 'now')",
            "INSERT INTO students(id, first_name, last_name, created_at) VALUES('s2', 'Ada', 'Lovelace', 'now')",
            "INSERT INTO courses(id, name, created_at) VALUES('c1', 'Computability', 'now')",
        ] {
            conn.execute(sql, []).expect(sql);
        }
    }

    #[test]
    fn unique_id_shape_is_stable() {
        let a = certificate_unique_id("s1", "c1", "salt");
        assert_eq!(a, certificate_unique_id("s1", "c1", "salt"));
        assert_ne!(a, certificate_unique_id("s1", "c1", "other"));
        assert!(a.starts_with("CERT-"));
        assert_eq!(a.len(), 5 + 16);
    }

    #[test]
    fn below_completion_issues_nothing() {
        let conn = open_memory();
        seed(&conn);
        assert!(issue_on_completion(&conn, "s1", "c1", 99)
            .expect("trigger")
            .is_none());
    }

    #[test]
    fn completion_issues_exactly_once_with_name_snapshot() {
        let conn = open_memory();
        seed(&conn);
        let cert = issue_on_completion(&conn, "s1", "c1", 100)
            .expect("trigger")
            .expect("issued");
        assert_eq!(cert.recipient, "Alan Turing");
        assert_eq!(cert.course_name, "Computability");
        assert!(cert.auto_issued);

        assert!(issue_on_completion(&conn, "s1", "c1", 100)
            .expect("trigger")
            .is_none());
        let all = list_certificates(&conn, &CertificateFilter::default()).expect("list");
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn bulk_allows_duplicates_and_counts_rows() {
        let conn = open_memory();
        seed(&conn);
        issue_on_completion(&conn, "s1", "c1", 100).expect("trigger");
        let count = issue_bulk(
            &conn,
            BulkIssue {
                course_id: "c1".into(),
                issue_date: "2024-06-30".into(),
                expiry_date: Some("2026-06-30".into()),
                student_ids: vec!["s1".into(), "s2".into()],
            },
        )
        .expect("bulk");
        assert_eq!(count, 2);

        let for_s1 = list_certificates(
            &conn,
            &CertificateFilter {
                student_id: Some("s1".into()),
                ..Default::default()
            },
        )
        .expect("list");
        assert_eq!(for_s1.len(), 2);
    }

    #[test]
    fn bulk_rejects_unknown_student_atomically() {
        let conn = open_memory();
        seed(&conn);
        let res = issue_bulk(
            &conn,
            BulkIssue {
                course_id: "c1".into(),
                issue_date: "2024-06-30".into(),
                expiry_date: None,
                student_ids: vec!["s1".into(), "ghost".into()],
            },
        );
        assert!(matches!(res, Err(EngineError::NotFound(_))));
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM certificates", [], |r| r.get(0))
            .expect("count");
        assert_eq!(n, 0);
    }

    #[test]
    fn bulk_validates_inputs() {
        let conn = open_memory();
        seed(&conn);
        let empty = issue_bulk(
            &conn,
            BulkIssue {
                course_id: "c1".into(),
                issue_date: "2024-06-30".into(),
                expiry_date: None,
                student_ids: vec![],
            },
        );
        assert!(matches!(empty, Err(EngineError::InvalidInput(_))));

        let backwards = issue_bulk(
            &conn,
            BulkIssue {
                course_id: "c1".into(),
                issue_date: "2024-06-30".into(),
                expiry_date: Some("2024-01-01".into()),
                student_ids: vec!["s1".into()],
            },
        );
        assert!(matches!(backwards, Err(EngineError::InvalidInput(_))));
    }

    #[test]
    fn manual_certificate_resolves_recipient_from_student() {
        let conn = open_memory();
        seed(&conn);
        let cert = create_certificate(
            &conn,
            ManualCertificate {
                recipient: None,
                course_id: "c1".into(),
                student_id: Some("s2".into()),
                issue_date: "2024-06-30".into(),
                expiry_date: None,
                unique_id: None,
            },
        )
        .expect("create");
        assert_eq!(cert.recipient, "Ada Lovelace");
        assert!(!cert.auto_issued);

        delete_certificate(&conn, &cert.id).expect("delete");
        assert!(matches!(
            get_certificate(&conn, &cert.id),
            Err(EngineError::NotFound(_))
        ));
    }
}
