use rusqlite::Connection;
use serde_json::json;

use crate::ipc::helpers::{
    get_optional_str, get_optional_string_array, get_required_str, to_json, with_workspace,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::roster;

fn students_create(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let first_name = get_required_str(params, "firstName")?;
    let last_name = get_required_str(params, "lastName")?;
    let email = get_optional_str(params, "email")?.filter(|s| !s.trim().is_empty());
    to_json(&roster::create_student(conn, &first_name, &last_name, email)?)
}

fn students_list(conn: &Connection) -> HandlerResult {
    Ok(json!({ "students": to_json(&roster::list_students(conn)?)? }))
}

fn courses_create(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let name = get_required_str(params, "name")?;
    to_json(&roster::create_course(conn, &name)?)
}

fn courses_list(conn: &Connection) -> HandlerResult {
    Ok(json!({ "courses": to_json(&roster::list_courses(conn)?)? }))
}

fn groups_create(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let name = get_required_str(params, "name")?;
    let course_ids = get_optional_string_array(params, "courseIds")?;
    let student_ids = get_optional_string_array(params, "studentIds")?;
    to_json(&roster::create_group(conn, &name, &course_ids, &student_ids)?)
}

fn enrollments_create(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let student_id = get_required_str(params, "studentId")?;
    let course_id = get_required_str(params, "courseId")?;
    to_json(&roster::create_enrollment(conn, &student_id, &course_id)?)
}

fn enrollments_get(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let student_id = get_required_str(params, "studentId")?;
    let course_id = get_required_str(params, "courseId")?;
    to_json(&roster::get_enrollment(conn, &student_id, &course_id)?)
}

fn enrollments_list(conn: &Connection, params: &serde_json::Value) -> HandlerResult {
    let student_id = get_optional_str(params, "studentId")?;
    let course_id = get_optional_str(params, "courseId")?;
    let rows = roster::list_enrollments(conn, student_id.as_deref(), course_id.as_deref())?;
    Ok(json!({ "enrollments": to_json(&rows)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let resp = match req.method.as_str() {
        "students.create" => with_workspace(state, req, |conn, _, p| students_create(conn, p)),
        "students.list" => with_workspace(state, req, |conn, _, _| students_list(conn)),
        "courses.create" => with_workspace(state, req, |conn, _, p| courses_create(conn, p)),
        "courses.list" => with_workspace(state, req, |conn, _, _| courses_list(conn)),
        "groups.create" => with_workspace(state, req, |conn, _, p| groups_create(conn, p)),
        "enrollments.create" => {
            with_workspace(state, req, |conn, _, p| enrollments_create(conn, p))
        }
        "enrollments.get" => with_workspace(state, req, |conn, _, p| enrollments_get(conn, p)),
        "enrollments.list" => with_workspace(state, req, |conn, _, p| enrollments_list(conn, p)),
        _ => return None,
    };
    Some(resp)
}
