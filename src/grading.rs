//! Work items (assignments and exams) and the per-student submissions graded
//! against them. Grading is the entry point of the progress pipeline: the
//! grade, the enrollment progress it implies and any completion certificate
//! are committed together or not at all.

use crate::db::begin_write;
use crate::error::{EngineError, EngineResult};
use crate::events::EventSink;
use crate::progress::{self, RecomputeOutcome, MAX_POINTS};
use crate::values::{exists, now_rfc3339};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkKind {
    Assignment,
    Exam,
}

impl WorkKind {
    fn item_table(self) -> &'static str {
        match self {
            WorkKind::Assignment => "assignments",
            WorkKind::Exam => "exams",
        }
    }

    fn submission_table(self) -> &'static str {
        match self {
            WorkKind::Assignment => "submissions",
            WorkKind::Exam => "exam_submissions",
        }
    }

    fn item_column(self) -> &'static str {
        match self {
            WorkKind::Assignment => "assignment_id",
            WorkKind::Exam => "exam_id",
        }
    }

    fn label(self) -> &'static str {
        match self {
            WorkKind::Assignment => "assignment",
            WorkKind::Exam => "exam",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionStatus {
    Pending,
    Submitted,
    Graded,
}

impl SubmissionStatus {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "PENDING" => Some(SubmissionStatus::Pending),
            "SUBMITTED" => Some(SubmissionStatus::Submitted),
            "GRADED" => Some(SubmissionStatus::Graded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub id: String,
    pub kind: WorkKind,
    pub group_id: String,
    pub teacher_id: String,
    pub title: String,
    pub description: Option<String>,
    /// Due date for assignments, exam date for exams.
    pub date: Option<String>,
    pub points: Option<i64>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItemCreated {
    #[serde(flatten)]
    pub item: WorkItem,
    pub submissions_created: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: String,
    pub kind: WorkKind,
    pub work_item_id: String,
    pub student_id: String,
    pub status: SubmissionStatus,
    pub content: Option<String>,
    pub grade: Option<i64>,
    pub feedback: Option<String>,
    pub submitted_at: Option<String>,
    pub graded_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeOutcome {
    pub submission: Submission,
    pub progress: Vec<RecomputeOutcome>,
}

#[derive(Debug, Clone)]
pub struct NewWorkItem {
    pub group_id: String,
    pub teacher_id: String,
    pub title: String,
    pub description: Option<String>,
    pub date: Option<String>,
    pub points: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct GradeInput {
    pub grade: i64,
    pub feedback: Option<String>,
    /// Restrict the recompute to this course instead of every course linked
    /// to the work item's group.
    pub course_id: Option<String>,
}

/// Creates a work item and seeds one PENDING submission for every student in
/// its group.
pub fn create_work_item(
    conn: &Connection,
    kind: WorkKind,
    new: NewWorkItem,
) -> EngineResult<WorkItemCreated> {
    let title = new.title.trim().to_string();
    if title.is_empty() {
        return Err(EngineError::invalid("title must not be empty"));
    }
    if new.teacher_id.trim().is_empty() {
        return Err(EngineError::invalid("teacherId is required"));
    }
    match (kind, new.points) {
        (WorkKind::Exam, Some(_)) => {
            return Err(EngineError::invalid("exams are always scored out of 100"));
        }
        (WorkKind::Assignment, Some(p)) if p <= 0 => {
            return Err(EngineError::invalid("points must be greater than zero"));
        }
        (WorkKind::Assignment, Some(p)) if p > MAX_POINTS => {
            return Err(EngineError::invalid(format!(
                "points must not exceed {MAX_POINTS}"
            )));
        }
        _ => {}
    }

    let tx = begin_write(conn)?;
    if !exists(&tx, "SELECT 1 FROM groups WHERE id = ?", [&new.group_id])? {
        return Err(EngineError::not_found("group"));
    }

    let item_id = Uuid::new_v4().to_string();
    let created_at = now_rfc3339();
    match kind {
        WorkKind::Assignment => tx.execute(
            "INSERT INTO assignments(id, group_id, teacher_id, title, description, due_date, points, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &item_id,
                &new.group_id,
                &new.teacher_id,
                &title,
                &new.description,
                &new.date,
                new.points,
                &created_at,
            ),
        )?,
        WorkKind::Exam => tx.execute(
            "INSERT INTO exams(id, group_id, teacher_id, title, description, exam_date, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                &item_id,
                &new.group_id,
                &new.teacher_id,
                &title,
                &new.description,
                &new.date,
                &created_at,
            ),
        )?,
    };

    let student_ids: Vec<String> = {
        let mut stmt = tx.prepare(
            "SELECT student_id FROM group_students WHERE group_id = ? ORDER BY student_id",
        )?;
        let ids = stmt
            .query_map([&new.group_id], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        ids
    };
    let insert_sql = format!(
        "INSERT INTO {}(id, {}, student_id, status) VALUES(?, ?, ?, 'PENDING')",
        kind.submission_table(),
        kind.item_column()
    );
    for student_id in &student_ids {
        tx.execute(
            &insert_sql,
            (Uuid::new_v4().to_string(), &item_id, student_id),
        )?;
    }
    tx.commit()?;

    tracing::info!(
        kind = kind.label(),
        item_id = %item_id,
        group_id = %new.group_id,
        submissions = student_ids.len(),
        "work item created"
    );
    Ok(WorkItemCreated {
        item: WorkItem {
            id: item_id,
            kind,
            group_id: new.group_id,
            teacher_id: new.teacher_id,
            title,
            description: new.description,
            date: new.date,
            points: new.points,
            created_at,
        },
        submissions_created: student_ids.len(),
    })
}

fn submission_from_row(kind: WorkKind, r: &Row<'_>) -> rusqlite::Result<Submission> {
    let status_raw: String = r.get(3)?;
    let status = SubmissionStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown submission status {status_raw}").into(),
        )
    })?;
    Ok(Submission {
        id: r.get(0)?,
        kind,
        work_item_id: r.get(1)?,
        student_id: r.get(2)?,
        status,
        content: r.get(4)?,
        grade: r.get(5)?,
        feedback: r.get(6)?,
        submitted_at: r.get(7)?,
        graded_at: r.get(8)?,
    })
}

pub fn get_submission(
    conn: &Connection,
    kind: WorkKind,
    submission_id: &str,
) -> EngineResult<Submission> {
    let sql = format!(
        "SELECT id, {}, student_id, status, content, grade, feedback, submitted_at, graded_at
         FROM {} WHERE id = ?",
        kind.item_column(),
        kind.submission_table()
    );
    conn.query_row(&sql, [submission_id], |r| submission_from_row(kind, r))
        .optional()?
        .ok_or_else(|| EngineError::not_found(format!("{} submission", kind.label())))
}

pub fn list_submissions(
    conn: &Connection,
    kind: WorkKind,
    work_item_id: Option<&str>,
    student_id: Option<&str>,
) -> EngineResult<Vec<Submission>> {
    let sql = format!(
        "SELECT id, {col}, student_id, status, content, grade, feedback, submitted_at, graded_at
         FROM {table}
         WHERE (?1 IS NULL OR {col} = ?1) AND (?2 IS NULL OR student_id = ?2)
         ORDER BY {col}, student_id",
        col = kind.item_column(),
        table = kind.submission_table()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map((work_item_id, student_id), |r| submission_from_row(kind, r))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Student hand-in. Graded work can't be resubmitted: it would drop out of
/// the earned total without the progress being recomputed.
pub fn submit(
    conn: &Connection,
    kind: WorkKind,
    submission_id: &str,
    content: &str,
) -> EngineResult<Submission> {
    if content.trim().is_empty() {
        return Err(EngineError::invalid("content must not be empty"));
    }
    let current = get_submission(conn, kind, submission_id)?;
    if current.status == SubmissionStatus::Graded {
        return Err(EngineError::conflict("submission has already been graded"));
    }
    conn.execute(
        &format!(
            "UPDATE {} SET content = ?, status = 'SUBMITTED', submitted_at = ? WHERE id = ?",
            kind.submission_table()
        ),
        (content, now_rfc3339(), submission_id),
    )?;
    get_submission(conn, kind, submission_id)
}

/// Grades a submission, then recomputes the student's progress in the
/// affected courses. A missing enrollment fails the whole grading action.
pub fn grade(
    conn: &Connection,
    sink: &dyn EventSink,
    kind: WorkKind,
    submission_id: &str,
    input: GradeInput,
) -> EngineResult<GradeOutcome> {
    if input.grade < 0 {
        return Err(EngineError::invalid("grade must not be negative"));
    }
    if input.grade > MAX_POINTS {
        return Err(EngineError::invalid(format!("grade must not exceed {MAX_POINTS}")));
    }

    let tx = begin_write(conn)?;
    let current = get_submission(&tx, kind, submission_id)?;
    let group_id: String = tx.query_row(
        &format!("SELECT group_id FROM {} WHERE id = ?", kind.item_table()),
        [&current.work_item_id],
        |r| r.get(0),
    )?;

    tx.execute(
        &format!(
            "UPDATE {} SET grade = ?, feedback = COALESCE(?, feedback), status = 'GRADED', graded_at = ?
             WHERE id = ?",
            kind.submission_table()
        ),
        (input.grade, &input.feedback, now_rfc3339(), submission_id),
    )?;

    let linked: Vec<String> = {
        let mut stmt = tx.prepare(
            "SELECT course_id FROM group_courses WHERE group_id = ? ORDER BY course_id",
        )?;
        let ids = stmt
            .query_map([&group_id], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        ids
    };
    let courses = match input.course_id {
        Some(cid) if linked.contains(&cid) => vec![cid],
        Some(_) => {
            return Err(EngineError::invalid(format!(
                "course is not linked to the {}'s group",
                kind.label()
            )));
        }
        None => linked,
    };

    let mut outcomes = Vec::with_capacity(courses.len());
    for course_id in &courses {
        outcomes.push(progress::recompute_in(&tx, &current.student_id, course_id)?);
    }
    let submission = get_submission(&tx, kind, submission_id)?;
    tx.commit()?;

    tracing::info!(
        kind = kind.label(),
        submission_id = %submission_id,
        student_id = %submission.student_id,
        grade = input.grade,
        courses = outcomes.len(),
        "submission graded"
    );
    for outcome in &outcomes {
        progress::announce(sink, outcome);
    }
    Ok(GradeOutcome {
        submission,
        progress: outcomes,
    })
}
