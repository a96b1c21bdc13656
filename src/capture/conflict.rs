use rusqlite::ErrorCode;

// SQLite extended result codes for the duplicate-key class.
const SQLITE_CONSTRAINT: i32 = 19;
const SQLITE_CONSTRAINT_PRIMARYKEY: i32 = 1555;
const SQLITE_CONSTRAINT_UNIQUE: i32 = 2067;

/// Decides whether a failed write lost a duplicate-key race. Injectable so
/// a different store gets its own rules; everything not recognized here
/// stays a storage error and aborts the batch.
pub trait ConflictClassifier {
    fn is_unique_violation(&self, err: &rusqlite::Error) -> bool;
}

/// Classifier for the bundled SQLite driver. The extended result code is
/// the primary signal; message phrasing is consulted only when SQLite
/// reports the bare constraint class without an extended code, so that
/// NOT NULL / CHECK / FK violations are never mistaken for capture races.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteConflictClassifier;

impl ConflictClassifier for SqliteConflictClassifier {
    fn is_unique_violation(&self, err: &rusqlite::Error) -> bool {
        let rusqlite::Error::SqliteFailure(cause, message) = err else {
            return false;
        };
        if cause.code != ErrorCode::ConstraintViolation {
            return false;
        }
        match cause.extended_code {
            SQLITE_CONSTRAINT_UNIQUE | SQLITE_CONSTRAINT_PRIMARYKEY => true,
            0 | SQLITE_CONSTRAINT => message
                .as_deref()
                .map(|m| m.contains("UNIQUE constraint failed"))
                .unwrap_or(false),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn scratch_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch(
            "CREATE TABLE marks(
                student TEXT NOT NULL,
                subject TEXT NOT NULL,
                grade REAL NOT NULL CHECK(grade >= 0),
                UNIQUE(student, subject)
            )",
        )
        .expect("create table");
        conn
    }

    #[test]
    fn duplicate_tuple_is_classified_as_conflict() {
        let conn = scratch_conn();
        conn.execute(
            "INSERT INTO marks(student, subject, grade) VALUES('a', 'math', 7.0)",
            [],
        )
        .expect("first insert");
        let err = conn
            .execute(
                "INSERT INTO marks(student, subject, grade) VALUES('a', 'math', 8.0)",
                [],
            )
            .expect_err("second insert must violate uniqueness");
        assert!(SqliteConflictClassifier.is_unique_violation(&err));
    }

    #[test]
    fn unrelated_constraint_violations_are_not_conflicts() {
        let conn = scratch_conn();

        let not_null = conn
            .execute("INSERT INTO marks(student, subject) VALUES('a', 'math')", [])
            .expect_err("grade is NOT NULL");
        assert!(!SqliteConflictClassifier.is_unique_violation(&not_null));

        let check = conn
            .execute(
                "INSERT INTO marks(student, subject, grade) VALUES('b', 'math', -1.0)",
                [],
            )
            .expect_err("CHECK(grade >= 0)");
        assert!(!SqliteConflictClassifier.is_unique_violation(&check));
    }

    #[test]
    fn non_sqlite_errors_are_not_conflicts() {
        assert!(!SqliteConflictClassifier.is_unique_violation(&rusqlite::Error::QueryReturnedNoRows));
    }

    #[test]
    fn message_fallback_requires_unique_phrasing() {
        let bare = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: ErrorCode::ConstraintViolation,
                extended_code: SQLITE_CONSTRAINT,
            },
            Some("UNIQUE constraint failed: grade_records.school_id".to_string()),
        );
        assert!(SqliteConflictClassifier.is_unique_violation(&bare));

        let other = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: ErrorCode::ConstraintViolation,
                extended_code: SQLITE_CONSTRAINT,
            },
            Some("CHECK constraint failed: grade".to_string()),
        );
        assert!(!SqliteConflictClassifier.is_unique_violation(&other));
    }
}
