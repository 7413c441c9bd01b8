use anyhow::Context;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

pub const DB_FILE_NAME: &str = "campus.sqlite3";

/// Opens a `BEGIN IMMEDIATE` transaction: the write lock is taken up front so
/// everything read inside it stays current until commit.
pub fn begin_write(conn: &Connection) -> rusqlite::Result<Transaction<'_>> {
    Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
}

pub fn open_db(workspace: &Path, busy_timeout_ms: u64) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace.to_string_lossy()
        )
    })?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.to_string_lossy()))?;
    conn.busy_timeout(Duration::from_millis(busy_timeout_ms))?;
    init_schema(&conn).context("failed to initialise schema")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    // Roster records owned by the identity/course collaborators; only the
    // columns the reconciliation pipelines read are kept here.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS groups(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS group_courses(
            group_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            PRIMARY KEY(group_id, course_id),
            FOREIGN KEY(group_id) REFERENCES groups(id),
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_group_courses_course ON group_courses(course_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS group_students(
            group_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            PRIMARY KEY(group_id, student_id),
            FOREIGN KEY(group_id) REFERENCES groups(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            student_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            progress INTEGER NOT NULL DEFAULT 0 CHECK (progress BETWEEN 0 AND 100),
            enrolled_at TEXT NOT NULL,
            updated_at TEXT,
            PRIMARY KEY(student_id, course_id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;

    // Billing. Money columns hold 2-decimal strings ("100.00").
    conn.execute(
        "CREATE TABLE IF NOT EXISTS fees(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            description TEXT,
            amount TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS invoices(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            issue_date TEXT NOT NULL,
            due_date TEXT NOT NULL,
            total_amount TEXT NOT NULL,
            status TEXT NOT NULL
                CHECK (status IN ('DRAFT', 'SENT', 'PAID', 'OVERDUE', 'CANCELLED')),
            created_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_invoices_student ON invoices(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS invoice_items(
            id TEXT PRIMARY KEY,
            invoice_id TEXT NOT NULL,
            fee_id TEXT NOT NULL,
            description TEXT NOT NULL,
            amount TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(invoice_id) REFERENCES invoices(id),
            FOREIGN KEY(fee_id) REFERENCES fees(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_invoice_items_invoice ON invoice_items(invoice_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS payments(
            id TEXT PRIMARY KEY,
            invoice_id TEXT NOT NULL,
            amount TEXT NOT NULL,
            payment_date TEXT NOT NULL,
            payment_method TEXT NOT NULL,
            transaction_id TEXT,
            notes TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(invoice_id) REFERENCES invoices(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_invoice ON payments(invoice_id)",
        [],
    )?;

    // The invoice total is fixed at creation and its items never change, so
    // reconciled status can't drift from the amounts it was computed against.
    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS trg_invoices_total_immutable
         BEFORE UPDATE OF total_amount ON invoices
         WHEN NEW.total_amount IS NOT OLD.total_amount
         BEGIN
           SELECT RAISE(ABORT, 'invoice total_amount is immutable');
         END",
        [],
    )?;
    conn.execute(
        "CREATE TRIGGER IF NOT EXISTS trg_invoice_items_immutable
         BEFORE UPDATE ON invoice_items
         BEGIN
           SELECT RAISE(ABORT, 'invoice items are immutable');
         END",
        [],
    )?;

    // Grading.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS assignments(
            id TEXT PRIMARY KEY,
            group_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            due_date TEXT,
            points INTEGER CHECK (points IS NULL OR points > 0),
            created_at TEXT NOT NULL,
            FOREIGN KEY(group_id) REFERENCES groups(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignments_group ON assignments(group_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS exams(
            id TEXT PRIMARY KEY,
            group_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            exam_date TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(group_id) REFERENCES groups(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exams_group ON exams(group_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS submissions(
            id TEXT PRIMARY KEY,
            assignment_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('PENDING', 'SUBMITTED', 'GRADED')),
            content TEXT,
            grade INTEGER CHECK (grade IS NULL OR grade >= 0),
            feedback TEXT,
            submitted_at TEXT,
            graded_at TEXT,
            FOREIGN KEY(assignment_id) REFERENCES assignments(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(assignment_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_submissions_student ON submissions(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS exam_submissions(
            id TEXT PRIMARY KEY,
            exam_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('PENDING', 'SUBMITTED', 'GRADED')),
            content TEXT,
            grade INTEGER CHECK (grade IS NULL OR grade >= 0),
            feedback TEXT,
            submitted_at TEXT,
            graded_at TEXT,
            FOREIGN KEY(exam_id) REFERENCES exams(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(exam_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exam_submissions_student ON exam_submissions(student_id)",
        [],
    )?;

    // Certificates.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS certificates(
            id TEXT PRIMARY KEY,
            recipient TEXT NOT NULL CHECK (length(trim(recipient)) > 0),
            course_id TEXT NOT NULL,
            student_id TEXT,
            issue_date TEXT NOT NULL,
            expiry_date TEXT,
            unique_id TEXT UNIQUE,
            auto_issued INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_certificates_course ON certificates(course_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_certificates_student ON certificates(student_id)",
        [],
    )?;
    // One automatically issued certificate per (student, course); operator
    // re-issues (auto_issued = 0) are not limited.
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_certificates_auto_once
         ON certificates(student_id, course_id) WHERE auto_issued = 1",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
pub fn open_memory() -> Connection {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    init_schema(&conn).expect("init schema");
    conn
}
