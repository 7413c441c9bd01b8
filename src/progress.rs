use crate::certificates::{self, Certificate};
use crate::db::begin_write;
use crate::error::{EngineError, EngineResult};
use crate::events::{EngineEvent, EventSink};
use crate::values::{now_rfc3339, require_course};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

/// Points an assignment is worth when it declares none.
pub const DEFAULT_ASSIGNMENT_POINTS: i64 = 100;
/// Every exam is scored out of 100.
pub const EXAM_POINTS: i64 = 100;
/// Upper bound for an assignment's points and for any single grade.
pub const MAX_POINTS: i64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressBreakdown {
    pub total_possible: i64,
    pub earned: i64,
    pub progress: i64,
}

/// Integer percentage, rounded half up. Earned points beyond what the course
/// offers (extra credit) are capped, so the result stays within 0..=100.
pub fn percent_complete(earned: i64, total_possible: i64) -> i64 {
    if total_possible <= 0 {
        return 0;
    }
    let earned = i128::from(earned.clamp(0, total_possible));
    let total = i128::from(total_possible);
    ((200 * earned + total) / (2 * total)) as i64
}

/// Completion of one student in one course, from the current grading state.
///
/// The course's work items are the assignments and exams of every group
/// linked to it. Only GRADED submissions earn points; pending or submitted
/// work counts as zero.
pub fn compute_progress(
    conn: &Connection,
    student_id: &str,
    course_id: &str,
) -> EngineResult<ProgressBreakdown> {
    require_course(conn, course_id)?;

    let assignment_points: i64 = conn.query_row(
        "SELECT COALESCE(SUM(COALESCE(a.points, ?)), 0)
         FROM assignments a
         JOIN group_courses gc ON gc.group_id = a.group_id
         WHERE gc.course_id = ?",
        (DEFAULT_ASSIGNMENT_POINTS, course_id),
        |r| r.get(0),
    )?;
    let exam_count: i64 = conn.query_row(
        "SELECT COUNT(*)
         FROM exams e
         JOIN group_courses gc ON gc.group_id = e.group_id
         WHERE gc.course_id = ?",
        [course_id],
        |r| r.get(0),
    )?;
    let total_possible = assignment_points + EXAM_POINTS * exam_count;

    let assignment_earned: i64 = conn.query_row(
        "SELECT COALESCE(SUM(s.grade), 0)
         FROM submissions s
         JOIN assignments a ON a.id = s.assignment_id
         JOIN group_courses gc ON gc.group_id = a.group_id
         WHERE gc.course_id = ? AND s.student_id = ? AND s.status = 'GRADED'",
        (course_id, student_id),
        |r| r.get(0),
    )?;
    let exam_earned: i64 = conn.query_row(
        "SELECT COALESCE(SUM(s.grade), 0)
         FROM exam_submissions s
         JOIN exams e ON e.id = s.exam_id
         JOIN group_courses gc ON gc.group_id = e.group_id
         WHERE gc.course_id = ? AND s.student_id = ? AND s.status = 'GRADED'",
        (course_id, student_id),
        |r| r.get(0),
    )?;
    let earned = assignment_earned + exam_earned;

    Ok(ProgressBreakdown {
        total_possible,
        earned,
        progress: percent_complete(earned, total_possible),
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecomputeOutcome {
    pub student_id: String,
    pub course_id: String,
    pub previous_progress: i64,
    #[serde(flatten)]
    pub breakdown: ProgressBreakdown,
    /// Set only when this recompute issued the completion certificate.
    pub certificate: Option<Certificate>,
}

/// Computes progress, writes it to the enrollment and runs the completion
/// trigger. Must run inside the caller's write transaction.
pub fn recompute_in(
    conn: &Connection,
    student_id: &str,
    course_id: &str,
) -> EngineResult<RecomputeOutcome> {
    let breakdown = compute_progress(conn, student_id, course_id)?;

    let previous_progress: i64 = conn
        .query_row(
            "SELECT progress FROM enrollments WHERE student_id = ? AND course_id = ?",
            (student_id, course_id),
            |r| r.get(0),
        )
        .optional()?
        .ok_or_else(|| EngineError::not_found("enrollment"))?;

    conn.execute(
        "UPDATE enrollments SET progress = ?, updated_at = ?
         WHERE student_id = ? AND course_id = ?",
        (breakdown.progress, now_rfc3339(), student_id, course_id),
    )?;

    let certificate =
        certificates::issue_on_completion(conn, student_id, course_id, breakdown.progress)?;

    Ok(RecomputeOutcome {
        student_id: student_id.to_string(),
        course_id: course_id.to_string(),
        previous_progress,
        breakdown,
        certificate,
    })
}

/// Emits the events for a committed recompute.
pub fn announce(sink: &dyn EventSink, outcome: &RecomputeOutcome) {
    if outcome.previous_progress != outcome.breakdown.progress {
        tracing::info!(
            student_id = %outcome.student_id,
            course_id = %outcome.course_id,
            from = outcome.previous_progress,
            to = outcome.breakdown.progress,
            "enrollment progress updated"
        );
        sink.emit(&EngineEvent::ProgressUpdated {
            student_id: outcome.student_id.clone(),
            course_id: outcome.course_id.clone(),
            from: outcome.previous_progress,
            to: outcome.breakdown.progress,
        });
    }
    if let Some(cert) = &outcome.certificate {
        tracing::info!(
            student_id = %outcome.student_id,
            course_id = %outcome.course_id,
            unique_id = cert.unique_id.as_deref().unwrap_or(""),
            "completion certificate issued"
        );
        sink.emit(&EngineEvent::CertificateIssued {
            certificate_id: cert.id.clone(),
            student_id: outcome.student_id.clone(),
            course_id: outcome.course_id.clone(),
            unique_id: cert.unique_id.clone().unwrap_or_default(),
        });
    }
}

pub fn recompute(
    conn: &Connection,
    sink: &dyn EventSink,
    student_id: &str,
    course_id: &str,
) -> EngineResult<RecomputeOutcome> {
    let tx = begin_write(conn)?;
    let outcome = recompute_in(&tx, student_id, course_id)?;
    tx.commit()?;
    announce(sink, &outcome);
    Ok(outcome)
}
