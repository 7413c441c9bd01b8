//! Students, courses, groups and enrollments: the records the identity and
//! course collaborators own. Only what the reconciliation pipelines read is
//! kept.

use crate::db::begin_write;
use crate::error::{EngineError, EngineResult};
use crate::values::{exists, now_rfc3339, require_course, require_student};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub name: String,
    pub course_ids: Vec<String>,
    pub student_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub student_id: String,
    pub course_id: String,
    pub progress: i64,
    pub enrolled_at: String,
    pub updated_at: Option<String>,
}

pub fn create_student(
    conn: &Connection,
    first_name: &str,
    last_name: &str,
    email: Option<String>,
) -> EngineResult<Student> {
    let first_name = first_name.trim();
    let last_name = last_name.trim();
    if first_name.is_empty() || last_name.is_empty() {
        return Err(EngineError::invalid("firstName and lastName must not be empty"));
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, first_name, last_name, email, created_at) VALUES(?, ?, ?, ?, ?)",
        (&id, first_name, last_name, &email, now_rfc3339()),
    )?;
    Ok(Student {
        id,
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
        email,
    })
}

pub fn list_students(conn: &Connection) -> EngineResult<Vec<Student>> {
    let mut stmt = conn.prepare(
        "SELECT id, first_name, last_name, email FROM students ORDER BY last_name, first_name",
    )?;
    let students = stmt
        .query_map([], |r| {
            Ok(Student {
                id: r.get(0)?,
                first_name: r.get(1)?,
                last_name: r.get(2)?,
                email: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(students)
}

pub fn create_course(conn: &Connection, name: &str) -> EngineResult<Course> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EngineError::invalid("name must not be empty"));
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO courses(id, name, created_at) VALUES(?, ?, ?)",
        (&id, name, now_rfc3339()),
    )?;
    Ok(Course {
        id,
        name: name.to_string(),
    })
}

pub fn list_courses(conn: &Connection) -> EngineResult<Vec<Course>> {
    let mut stmt = conn.prepare("SELECT id, name FROM courses ORDER BY name")?;
    let courses = stmt
        .query_map([], |r| {
            Ok(Course {
                id: r.get(0)?,
                name: r.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(courses)
}

/// Creates a group linked to `course_ids` with `student_ids` as members.
pub fn create_group(
    conn: &Connection,
    name: &str,
    course_ids: &[String],
    student_ids: &[String],
) -> EngineResult<Group> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EngineError::invalid("name must not be empty"));
    }
    let tx = begin_write(conn)?;
    for cid in course_ids {
        require_course(&tx, cid)?;
    }
    for sid in student_ids {
        require_student(&tx, sid)?;
    }
    let id = Uuid::new_v4().to_string();
    tx.execute("INSERT INTO groups(id, name) VALUES(?, ?)", (&id, name))?;
    for cid in course_ids {
        tx.execute(
            "INSERT OR IGNORE INTO group_courses(group_id, course_id) VALUES(?, ?)",
            (&id, cid),
        )?;
    }
    for sid in student_ids {
        tx.execute(
            "INSERT OR IGNORE INTO group_students(group_id, student_id) VALUES(?, ?)",
            (&id, sid),
        )?;
    }
    tx.commit()?;
    Ok(Group {
        id,
        name: name.to_string(),
        course_ids: course_ids.to_vec(),
        student_ids: student_ids.to_vec(),
    })
}

fn enrollment_from_row(r: &Row<'_>) -> rusqlite::Result<Enrollment> {
    Ok(Enrollment {
        student_id: r.get(0)?,
        course_id: r.get(1)?,
        progress: r.get(2)?,
        enrolled_at: r.get(3)?,
        updated_at: r.get(4)?,
    })
}

pub fn create_enrollment(
    conn: &Connection,
    student_id: &str,
    course_id: &str,
) -> EngineResult<Enrollment> {
    require_student(conn, student_id)?;
    require_course(conn, course_id)?;
    if exists(
        conn,
        "SELECT 1 FROM enrollments WHERE student_id = ? AND course_id = ?",
        (student_id, course_id),
    )? {
        return Err(EngineError::conflict("student is already enrolled in this course"));
    }
    conn.execute(
        "INSERT INTO enrollments(student_id, course_id, progress, enrolled_at) VALUES(?, ?, 0, ?)",
        (student_id, course_id, now_rfc3339()),
    )?;
    get_enrollment(conn, student_id, course_id)
}

pub fn get_enrollment(
    conn: &Connection,
    student_id: &str,
    course_id: &str,
) -> EngineResult<Enrollment> {
    conn.query_row(
        "SELECT student_id, course_id, progress, enrolled_at, updated_at
         FROM enrollments WHERE student_id = ? AND course_id = ?",
        (student_id, course_id),
        enrollment_from_row,
    )
    .optional()?
    .ok_or_else(|| EngineError::not_found("enrollment"))
}

pub fn list_enrollments(
    conn: &Connection,
    student_id: Option<&str>,
    course_id: Option<&str>,
) -> EngineResult<Vec<Enrollment>> {
    let mut stmt = conn.prepare(
        "SELECT student_id, course_id, progress, enrolled_at, updated_at
         FROM enrollments
         WHERE (?1 IS NULL OR student_id = ?1) AND (?2 IS NULL OR course_id = ?2)
         ORDER BY course_id, student_id",
    )?;
    let rows = stmt
        .query_map((student_id, course_id), enrollment_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
