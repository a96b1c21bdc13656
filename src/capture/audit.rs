use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// prev_hash of the first entry in a school's chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Before/after record of one recalibration. Written exactly once per
/// successful update, inside the same transaction, never touched again.
#[derive(Debug, Clone)]
pub struct AuditEntry<'a> {
    pub school_id: &'a str,
    pub grade_record_id: &'a str,
    pub student_id: &'a str,
    pub subject_id: &'a str,
    pub group_id: &'a str,
    pub period_id: &'a str,
    pub previous_grade: f64,
    pub new_grade: f64,
    pub previous_notes: Option<&'a str>,
    pub new_notes: Option<&'a str>,
    pub reason: &'a str,
    pub performed_by_staff_id: &'a str,
    pub correlation_id: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRow {
    pub id: String,
    pub school_id: String,
    pub grade_record_id: String,
    pub student_id: String,
    pub subject_id: String,
    pub group_id: String,
    pub period_id: String,
    pub previous_grade: f64,
    pub new_grade: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_notes: Option<String>,
    pub reason: String,
    pub performed_by_staff_id: String,
    pub performed_at: String,
    pub correlation_id: String,
    pub entry_hash: String,
}

/// Filters for the investigation queries. At least one must be set;
/// school-scoped lookups combine with period/student/group/subject.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub school_id: Option<String>,
    pub student_id: Option<String>,
    pub group_id: Option<String>,
    pub subject_id: Option<String>,
    pub period_id: Option<String>,
    pub correlation_id: Option<String>,
    pub performed_by_staff_id: Option<String>,
}

impl AuditQuery {
    pub fn is_empty(&self) -> bool {
        self.school_id.is_none()
            && self.student_id.is_none()
            && self.group_id.is_none()
            && self.subject_id.is_none()
            && self.period_id.is_none()
            && self.correlation_id.is_none()
            && self.performed_by_staff_id.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainVerification {
    pub entries: usize,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broken_at: Option<String>,
}

/// Appends one entry to the school's chain. Must run inside the same
/// transaction as the grade update it records; the unique write lock also
/// guarantees the chain head read here is current.
pub fn record(conn: &Connection, entry: &AuditEntry) -> Result<String, rusqlite::Error> {
    let id = Uuid::new_v4().to_string();
    let performed_at = Utc::now().to_rfc3339();
    let prev_hash = chain_head(conn, entry.school_id)?;
    let entry_hash = entry_digest(&id, entry, &performed_at, &prev_hash);

    conn.execute(
        "INSERT INTO grade_audit(
            id, school_id, grade_record_id, student_id, subject_id, group_id,
            period_id, previous_grade, new_grade, previous_notes, new_notes,
            reason, performed_by_staff_id, performed_at, correlation_id,
            prev_hash, entry_hash
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            id,
            entry.school_id,
            entry.grade_record_id,
            entry.student_id,
            entry.subject_id,
            entry.group_id,
            entry.period_id,
            entry.previous_grade,
            entry.new_grade,
            entry.previous_notes,
            entry.new_notes,
            entry.reason,
            entry.performed_by_staff_id,
            performed_at,
            entry.correlation_id,
            prev_hash,
            entry_hash,
        ],
    )?;
    Ok(id)
}

pub fn query(conn: &Connection, filter: &AuditQuery) -> Result<Vec<AuditRow>, rusqlite::Error> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<&str> = Vec::new();
    let pairs: [(&str, &Option<String>); 7] = [
        ("school_id = ?", &filter.school_id),
        ("student_id = ?", &filter.student_id),
        ("group_id = ?", &filter.group_id),
        ("subject_id = ?", &filter.subject_id),
        ("period_id = ?", &filter.period_id),
        ("correlation_id = ?", &filter.correlation_id),
        ("performed_by_staff_id = ?", &filter.performed_by_staff_id),
    ];
    for (clause, value) in pairs {
        if let Some(v) = value {
            clauses.push(clause);
            binds.push(v.as_str());
        }
    }

    let filter_sql = if clauses.is_empty() {
        "1".to_string()
    } else {
        clauses.join(" AND ")
    };
    let sql = format!(
        "SELECT id, school_id, grade_record_id, student_id, subject_id, group_id,
                period_id, previous_grade, new_grade, previous_notes, new_notes,
                reason, performed_by_staff_id, performed_at, correlation_id, entry_hash
         FROM grade_audit
         WHERE {}
         ORDER BY rowid",
        filter_sql,
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(binds), |r| {
        Ok(AuditRow {
            id: r.get(0)?,
            school_id: r.get(1)?,
            grade_record_id: r.get(2)?,
            student_id: r.get(3)?,
            subject_id: r.get(4)?,
            group_id: r.get(5)?,
            period_id: r.get(6)?,
            previous_grade: r.get(7)?,
            new_grade: r.get(8)?,
            previous_notes: r.get(9)?,
            new_notes: r.get(10)?,
            reason: r.get(11)?,
            performed_by_staff_id: r.get(12)?,
            performed_at: r.get(13)?,
            correlation_id: r.get(14)?,
            entry_hash: r.get(15)?,
        })
    })?;
    rows.collect()
}

/// Recomputes every digest in a school's chain in append order and checks
/// both the per-entry hash and the link to the predecessor. Reports the
/// first entry whose stored state no longer matches.
pub fn verify_chain(
    conn: &Connection,
    school_id: &str,
) -> Result<ChainVerification, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT id, grade_record_id, student_id, subject_id, group_id, period_id,
                previous_grade, new_grade, previous_notes, new_notes, reason,
                performed_by_staff_id, performed_at, correlation_id, prev_hash, entry_hash
         FROM grade_audit
         WHERE school_id = ?
         ORDER BY rowid",
    )?;

    struct StoredEntry {
        id: String,
        grade_record_id: String,
        student_id: String,
        subject_id: String,
        group_id: String,
        period_id: String,
        previous_grade: f64,
        new_grade: f64,
        previous_notes: Option<String>,
        new_notes: Option<String>,
        reason: String,
        performed_by_staff_id: String,
        performed_at: String,
        correlation_id: String,
        prev_hash: String,
        entry_hash: String,
    }

    let rows = stmt.query_map([school_id], |r| {
        Ok(StoredEntry {
            id: r.get(0)?,
            grade_record_id: r.get(1)?,
            student_id: r.get(2)?,
            subject_id: r.get(3)?,
            group_id: r.get(4)?,
            period_id: r.get(5)?,
            previous_grade: r.get(6)?,
            new_grade: r.get(7)?,
            previous_notes: r.get(8)?,
            new_notes: r.get(9)?,
            reason: r.get(10)?,
            performed_by_staff_id: r.get(11)?,
            performed_at: r.get(12)?,
            correlation_id: r.get(13)?,
            prev_hash: r.get(14)?,
            entry_hash: r.get(15)?,
        })
    })?;

    let mut expected_prev = GENESIS_HASH.to_string();
    let mut entries = 0usize;
    for row in rows {
        let row = row?;
        entries += 1;
        let entry = AuditEntry {
            school_id,
            grade_record_id: &row.grade_record_id,
            student_id: &row.student_id,
            subject_id: &row.subject_id,
            group_id: &row.group_id,
            period_id: &row.period_id,
            previous_grade: row.previous_grade,
            new_grade: row.new_grade,
            previous_notes: row.previous_notes.as_deref(),
            new_notes: row.new_notes.as_deref(),
            reason: &row.reason,
            performed_by_staff_id: &row.performed_by_staff_id,
            correlation_id: &row.correlation_id,
        };
        let recomputed = entry_digest(&row.id, &entry, &row.performed_at, &row.prev_hash);
        if row.prev_hash != expected_prev || row.entry_hash != recomputed {
            return Ok(ChainVerification {
                entries,
                ok: false,
                broken_at: Some(row.id),
            });
        }
        expected_prev = row.entry_hash;
    }

    Ok(ChainVerification {
        entries,
        ok: true,
        broken_at: None,
    })
}

fn chain_head(conn: &Connection, school_id: &str) -> Result<String, rusqlite::Error> {
    let head: Option<String> = conn
        .query_row(
            "SELECT entry_hash FROM grade_audit WHERE school_id = ? ORDER BY rowid DESC LIMIT 1",
            [school_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(head.unwrap_or_else(|| GENESIS_HASH.to_string()))
}

fn entry_digest(id: &str, entry: &AuditEntry, performed_at: &str, prev_hash: &str) -> String {
    fn opt(value: Option<&str>) -> String {
        match value {
            Some(v) => format!("1{}", v),
            None => "0".to_string(),
        }
    }

    let canonical = [
        id.to_string(),
        entry.school_id.to_string(),
        entry.grade_record_id.to_string(),
        entry.student_id.to_string(),
        entry.subject_id.to_string(),
        entry.group_id.to_string(),
        entry.period_id.to_string(),
        format!("{}", entry.previous_grade),
        format!("{}", entry.new_grade),
        opt(entry.previous_notes),
        opt(entry.new_notes),
        entry.reason.to_string(),
        entry.performed_by_staff_id.to_string(),
        performed_at.to_string(),
        entry.correlation_id.to_string(),
    ]
    .join("\u{1f}");

    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(b"\n");
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}
