use rusqlite::Connection;
use serde_json::json;

use crate::events::EventSink;
use crate::grading::{self, GradeInput, NewWorkItem, WorkKind};
use crate::ipc::helpers::{
    get_optional_date, get_optional_int, get_optional_str, get_required_int, get_required_str,
    to_json, with_workspace, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::progress;

fn work_item_create(conn: &Connection, kind: WorkKind, params: &serde_json::Value) -> HandlerResult {
    let date_key = match kind {
        WorkKind::Assignment => "dueDate",
        WorkKind::Exam => "examDate",
    };
    let new = NewWorkItem {
        group_id: get_required_str(params, "groupId")?,
        teacher_id: get_required_str(params, "teacherId")?,
        title: get_required_str(params, "title")?,
        description: get_optional_str(params, "description")?,
        date: get_optional_date(params, date_key)?,
        points: get_optional_int(params, "points")?,
    };
    to_json(&grading::create_work_item(conn, kind, new)?)
}

fn submission_get(conn: &Connection, kind: WorkKind, params: &serde_json::Value) -> HandlerResult {
    let submission_id = get_required_str(params, "submissionId")?;
    to_json(&grading::get_submission(conn, kind, &submission_id)?)
}

fn submission_list(conn: &Connection, kind: WorkKind, params: &serde_json::Value) -> HandlerResult {
    let item_key = match kind {
        WorkKind::Assignment => "assignmentId",
        WorkKind::Exam => "examId",
    };
    let work_item_id = get_optional_str(params, item_key)?;
    let student_id = get_optional_str(params, "studentId")?;
    let rows =
        grading::list_submissions(conn, kind, work_item_id.as_deref(), student_id.as_deref())?;
    Ok(json!({ "submissions": to_json(&rows)? }))
}

fn submission_submit(conn: &Connection, kind: WorkKind, params: &serde_json::Value) -> HandlerResult {
    let submission_id = get_required_str(params, "submissionId")?;
    let content = get_required_str(params, "content")?;
    to_json(&grading::submit(conn, kind, &submission_id, &content)?)
}

fn submission_grade(
    conn: &Connection,
    sink: &dyn EventSink,
    kind: WorkKind,
    params: &serde_json::Value,
) -> HandlerResult {
    let submission_id = get_required_str(params, "submissionId")?;
    let input = GradeInput {
        grade: get_required_int(params, "grade")?,
        feedback: get_optional_str(params, "feedback")?,
        course_id: get_optional_str(params, "courseId")?,
    };
    to_json(&grading::grade(conn, sink, kind, &submission_id, input)?)
}

fn progress_recompute(
    conn: &Connection,
    sink: &dyn EventSink,
    params: &serde_json::Value,
) -> HandlerResult {
    let student_id = get_required_str(params, "studentId")?;
    let course_id = get_required_str(params, "courseId")?;
    to_json(&progress::recompute(conn, sink, &student_id, &course_id)?)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    use WorkKind::{Assignment, Exam};

    let resp = match req.method.as_str() {
        "assignments.create" => {
            with_workspace(state, req, |conn, _, p| work_item_create(conn, Assignment, p))
        }
        "exams.create" => with_workspace(state, req, |conn, _, p| work_item_create(conn, Exam, p)),
        "submissions.get" => {
            with_workspace(state, req, |conn, _, p| submission_get(conn, Assignment, p))
        }
        "submissions.list" => {
            with_workspace(state, req, |conn, _, p| submission_list(conn, Assignment, p))
        }
        "submissions.submit" => {
            with_workspace(state, req, |conn, _, p| submission_submit(conn, Assignment, p))
        }
        "submissions.grade" => with_workspace(state, req, |conn, sink, p| {
            submission_grade(conn, sink, Assignment, p)
        }),
        "examSubmissions.get" => {
            with_workspace(state, req, |conn, _, p| submission_get(conn, Exam, p))
        }
        "examSubmissions.list" => {
            with_workspace(state, req, |conn, _, p| submission_list(conn, Exam, p))
        }
        "examSubmissions.submit" => {
            with_workspace(state, req, |conn, _, p| submission_submit(conn, Exam, p))
        }
        "examSubmissions.grade" => with_workspace(state, req, |conn, sink, p| {
            submission_grade(conn, sink, Exam, p)
        }),
        "progress.recompute" => with_workspace(state, req, progress_recompute),
        _ => return None,
    };
    Some(resp)
}
