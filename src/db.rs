use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "escolar.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schools(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            locality TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS staff(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            role TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_staff_school ON staff(school_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            enrollment_no TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            sort_order INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_school ON students(school_id)",
        [],
    )?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_students_enrollment_no
         ON students(school_id, enrollment_no) WHERE enrollment_no IS NOT NULL",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS school_groups(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            name TEXT NOT NULL,
            grade_level TEXT,
            FOREIGN KEY(school_id) REFERENCES schools(id),
            UNIQUE(school_id, name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_school_groups_school ON school_groups(school_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            name TEXT NOT NULL,
            short_code TEXT,
            FOREIGN KEY(school_id) REFERENCES schools(id),
            UNIQUE(school_id, name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_school ON subjects(school_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS eval_periods(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            name TEXT NOT NULL,
            starts_on TEXT,
            ends_on TEXT,
            FOREIGN KEY(school_id) REFERENCES schools(id),
            UNIQUE(school_id, name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_eval_periods_school ON eval_periods(school_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS group_enrollments(
            group_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            period_id TEXT NOT NULL,
            enrolled_at TEXT,
            PRIMARY KEY(group_id, student_id, period_id),
            FOREIGN KEY(group_id) REFERENCES school_groups(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(period_id) REFERENCES eval_periods(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_group_enrollments_group
         ON group_enrollments(group_id, period_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_group_enrollments_student
         ON group_enrollments(student_id)",
        [],
    )?;

    // One grade per (school, student, subject, group, period). The unique
    // constraint is the physical backstop behind the planner's logical
    // check; concurrent capture races land here.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_records(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            group_id TEXT NOT NULL,
            period_id TEXT NOT NULL,
            numeric_grade REAL NOT NULL,
            evaluation_type TEXT NOT NULL DEFAULT 'regular',
            weight REAL,
            notes TEXT,
            captured_by_staff_id TEXT NOT NULL,
            captured_at TEXT NOT NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(group_id) REFERENCES school_groups(id),
            FOREIGN KEY(period_id) REFERENCES eval_periods(id),
            UNIQUE(school_id, student_id, subject_id, group_id, period_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_records_roster
         ON grade_records(school_id, group_id, subject_id, period_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_records_student
         ON grade_records(student_id)",
        [],
    )?;

    // Append-only; no UPDATE or DELETE is ever issued against this table.
    // entry_hash chains entries per school for tamper evidence.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_audit(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            grade_record_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            group_id TEXT NOT NULL,
            period_id TEXT NOT NULL,
            previous_grade REAL NOT NULL,
            new_grade REAL NOT NULL,
            previous_notes TEXT,
            new_notes TEXT,
            reason TEXT NOT NULL,
            performed_by_staff_id TEXT NOT NULL,
            performed_at TEXT NOT NULL,
            correlation_id TEXT NOT NULL,
            prev_hash TEXT NOT NULL,
            entry_hash TEXT NOT NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id),
            FOREIGN KEY(grade_record_id) REFERENCES grade_records(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_audit_student
         ON grade_audit(school_id, student_id, period_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_audit_group
         ON grade_audit(school_id, group_id, period_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_audit_subject
         ON grade_audit(school_id, subject_id, period_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_audit_correlation
         ON grade_audit(correlation_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_audit_actor
         ON grade_audit(performed_by_staff_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    // Workspaces created before evaluation_type/weight existed on grade
    // rows get the columns added in place.
    ensure_grade_records_capture_columns(&conn)?;

    Ok(conn)
}

fn ensure_grade_records_capture_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "grade_records", "evaluation_type")? {
        conn.execute(
            "ALTER TABLE grade_records ADD COLUMN evaluation_type TEXT NOT NULL DEFAULT 'regular'",
            [],
        )?;
    }
    if !table_has_column(conn, "grade_records", "weight")? {
        conn.execute("ALTER TABLE grade_records ADD COLUMN weight REAL", [])?;
    }
    Ok(())
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value_json FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
