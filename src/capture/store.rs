use std::collections::{HashMap, HashSet};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use super::types::ExistingGrade;

/// Tuple scope of one batch: everything but the student id.
#[derive(Debug, Clone, Copy)]
pub struct BatchScope<'a> {
    pub school_id: &'a str,
    pub group_id: &'a str,
    pub subject_id: &'a str,
    pub period_id: &'a str,
}

#[derive(Debug, Clone)]
pub struct NewGrade<'a> {
    pub student_id: &'a str,
    pub numeric_grade: f64,
    pub notes: Option<&'a str>,
    pub evaluation_type: &'a str,
    pub captured_by_staff_id: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeRow {
    pub id: String,
    pub student_id: String,
    pub numeric_grade: f64,
    pub evaluation_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub captured_by_staff_id: String,
    pub captured_at: String,
}

/// Student ids enrolled in the group for the period. This is the roster
/// the planner validates membership against.
pub fn roster_members(
    conn: &Connection,
    group_id: &str,
    period_id: &str,
) -> Result<HashSet<String>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT student_id FROM group_enrollments WHERE group_id = ? AND period_id = ?",
    )?;
    let rows = stmt.query_map([group_id, period_id], |r| r.get::<_, String>(0))?;
    rows.collect()
}

/// Current grade per student for the batch tuple, keyed by student id.
/// This is the snapshot the planner decides against.
pub fn load_existing(
    conn: &Connection,
    scope: BatchScope,
) -> Result<HashMap<String, ExistingGrade>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT student_id, id, numeric_grade, notes FROM grade_records
         WHERE school_id = ? AND group_id = ? AND subject_id = ? AND period_id = ?",
    )?;
    let rows = stmt.query_map(
        [scope.school_id, scope.group_id, scope.subject_id, scope.period_id],
        |r| {
            Ok((
                r.get::<_, String>(0)?,
                ExistingGrade {
                    record_id: r.get(1)?,
                    numeric_grade: r.get(2)?,
                    notes: r.get(3)?,
                },
            ))
        },
    )?;
    rows.collect()
}

/// Inserts one grade row. A unique-constraint failure here means another
/// writer captured the same tuple first; the caller classifies it.
pub fn insert_grade(
    conn: &Connection,
    scope: BatchScope,
    grade: &NewGrade,
) -> Result<String, rusqlite::Error> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO grade_records(
            id, school_id, student_id, subject_id, group_id, period_id,
            numeric_grade, evaluation_type, notes, captured_by_staff_id, captured_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            id,
            scope.school_id,
            grade.student_id,
            scope.subject_id,
            scope.group_id,
            scope.period_id,
            grade.numeric_grade,
            grade.evaluation_type,
            grade.notes,
            grade.captured_by_staff_id,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(id)
}

/// Authoritative read of the row about to be recalibrated, issued inside
/// the commit transaction so the audit "before" state cannot be stale.
pub fn read_current(
    conn: &Connection,
    scope: BatchScope,
    student_id: &str,
) -> Result<Option<ExistingGrade>, rusqlite::Error> {
    conn.query_row(
        "SELECT id, numeric_grade, notes FROM grade_records
         WHERE school_id = ? AND student_id = ? AND subject_id = ?
           AND group_id = ? AND period_id = ?",
        params![
            scope.school_id,
            student_id,
            scope.subject_id,
            scope.group_id,
            scope.period_id
        ],
        |r| {
            Ok(ExistingGrade {
                record_id: r.get(0)?,
                numeric_grade: r.get(1)?,
                notes: r.get(2)?,
            })
        },
    )
    .optional()
}

pub fn update_grade(
    conn: &Connection,
    record_id: &str,
    grade: &NewGrade,
) -> Result<usize, rusqlite::Error> {
    conn.execute(
        "UPDATE grade_records
         SET numeric_grade = ?, notes = ?, evaluation_type = ?,
             captured_by_staff_id = ?, captured_at = ?
         WHERE id = ?",
        params![
            grade.numeric_grade,
            grade.notes,
            grade.evaluation_type,
            grade.captured_by_staff_id,
            Utc::now().to_rfc3339(),
            record_id,
        ],
    )
}

pub fn list_for_scope(
    conn: &Connection,
    scope: BatchScope,
) -> Result<Vec<GradeRow>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT id, student_id, numeric_grade, evaluation_type, weight, notes,
                captured_by_staff_id, captured_at
         FROM grade_records
         WHERE school_id = ? AND group_id = ? AND subject_id = ? AND period_id = ?
         ORDER BY student_id",
    )?;
    let rows = stmt.query_map(
        [scope.school_id, scope.group_id, scope.subject_id, scope.period_id],
        |r| {
            Ok(GradeRow {
                id: r.get(0)?,
                student_id: r.get(1)?,
                numeric_grade: r.get(2)?,
                evaluation_type: r.get(3)?,
                weight: r.get(4)?,
                notes: r.get(5)?,
                captured_by_staff_id: r.get(6)?,
                captured_at: r.get(7)?,
            })
        },
    )?;
    rows.collect()
}
