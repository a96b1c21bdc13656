mod test_support;

use serde_json::json;
use test_support::{request_ok, seed_classroom, spawn_sidecar, temp_dir, with_params};

// Two daemon processes over one workspace stand in for two teachers
// submitting overlapping batches. The unique constraint guarantees one
// writer per tuple; the loser gets an explicit block instead of a silent
// overwrite, and re-fetching shows the winner's grade.
#[test]
fn overlapping_submissions_from_two_processes_keep_one_row_per_tuple() {
    let workspace = temp_dir("escolar-concurrent");
    let (_child_a, mut stdin_a, mut reader_a) = spawn_sidecar();
    let (_child_b, mut stdin_b, mut reader_b) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin_a,
        &mut reader_a,
        "a1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = seed_classroom(&mut stdin_a, &mut reader_a, 1);
    let student = class.student_ids[0].clone();

    let _ = request_ok(
        &mut stdin_b,
        &mut reader_b,
        "b1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    // Teacher A previews while the tuple is still free.
    let preview = request_ok(
        &mut stdin_a,
        &mut reader_a,
        "a2",
        "grades.batchPreview",
        with_params(
            class.scope_params(),
            json!({ "lines": [{ "studentId": student, "numericGrade": 7.0 }] }),
        ),
    );
    assert_eq!(
        preview["decisions"][0].get("action").and_then(|v| v.as_str()),
        Some("insert")
    );

    // Teacher B lands the grade first from the other process.
    let won = request_ok(
        &mut stdin_b,
        &mut reader_b,
        "b2",
        "grades.batchSubmit",
        with_params(
            class.scope_params(),
            json!({ "lines": [{ "studentId": student, "numericGrade": 9.0 }] }),
        ),
    );
    assert_eq!(won.get("inserted").and_then(|v| v.as_i64()), Some(1));

    // A's submission now finds the tuple taken: explicitly blocked, never
    // silently overwritten, never a second row.
    let lost = request_ok(
        &mut stdin_a,
        &mut reader_a,
        "a3",
        "grades.batchSubmit",
        with_params(
            class.scope_params(),
            json!({ "lines": [{ "studentId": student, "numericGrade": 7.0 }] }),
        ),
    );
    assert_eq!(lost.get("inserted").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(
        lost.get("blockedExisting").and_then(|v| v.as_i64()),
        Some(1)
    );

    // Both processes agree on a single surviving row with B's grade.
    for (stdin, reader, id) in [
        (&mut stdin_a, &mut reader_a, "a4"),
        (&mut stdin_b, &mut reader_b, "b3"),
    ] {
        let listed = request_ok(stdin, reader, id, "grades.listForGroup", class.scope_params());
        let grades = listed["grades"].as_array().expect("grades");
        assert_eq!(grades.len(), 1, "exactly one row per tuple");
        assert_eq!(
            grades[0].get("numericGrade").and_then(|v| v.as_f64()),
            Some(9.0),
            "the first writer's grade must survive"
        );
    }

    // The human retry path: A re-fetches, then recalibrates with a reason.
    let recal = request_ok(
        &mut stdin_a,
        &mut reader_a,
        "a5",
        "grades.batchSubmit",
        with_params(
            class.scope_params(),
            json!({
                "permitRecalibration": true,
                "reason": "Agreed with co-teacher to keep my rubric's score",
                "lines": [{ "studentId": student, "numericGrade": 7.0 }]
            }),
        ),
    );
    assert_eq!(recal.get("updated").and_then(|v| v.as_i64()), Some(1));

    let audit = request_ok(
        &mut stdin_b,
        &mut reader_b,
        "b4",
        "audit.query",
        json!({ "schoolId": class.school_id }),
    );
    let entries = audit["entries"].as_array().expect("entries");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["previousGrade"].as_f64(), Some(9.0));
    assert_eq!(entries[0]["newGrade"].as_f64(), Some(7.0));
}
