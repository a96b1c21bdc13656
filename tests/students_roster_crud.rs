mod test_support;

use serde_json::json;
use test_support::{request, request_ok, seed_classroom, spawn_sidecar, temp_dir, with_params};

#[test]
fn roster_administration_backs_the_capture_scope() {
    let workspace = temp_dir("escolar-roster-crud");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = seed_classroom(&mut stdin, &mut reader, 2);

    // Enrollment numbers are unique per school.
    let dup = request(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({
            "schoolId": class.school_id,
            "lastName": "Clon",
            "firstName": "Otro",
            "enrollmentNo": "MAT-0000"
        }),
    );
    assert_eq!(dup.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        dup["error"].get("code").and_then(|v| v.as_str()),
        Some("duplicate_enrollment_no")
    );

    // So are group names.
    let dup_group = request(
        &mut stdin,
        &mut reader,
        "3",
        "groups.create",
        json!({ "schoolId": class.school_id, "name": "5A" }),
    );
    assert_eq!(dup_group.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        dup_group["error"].get("code").and_then(|v| v.as_str()),
        Some("duplicate_group_name")
    );

    // A student created but never enrolled is outside the capture roster.
    let unenrolled = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.create",
        json!({
            "schoolId": class.school_id,
            "lastName": "Nuevo",
            "firstName": "Ingreso"
        }),
    );
    let unenrolled_id = unenrolled
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();

    let capture = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "grades.captureOne",
        with_params(
            class.scope_params(),
            json!({ "studentId": unenrolled_id, "numericGrade": 8.0 }),
        ),
    );
    assert_eq!(
        capture.get("status").and_then(|v| v.as_str()),
        Some("failed")
    );

    // Enrolling brings the student into the roster.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "enrollment.add",
        json!({
            "groupId": class.group_id,
            "studentId": unenrolled_id,
            "periodId": class.period_id
        }),
    );
    let roster = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "enrollment.list",
        json!({ "groupId": class.group_id, "periodId": class.period_id }),
    );
    let students = roster["students"].as_array().expect("students");
    assert_eq!(students.len(), 3);

    let capture = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "grades.captureOne",
        with_params(
            class.scope_params(),
            json!({ "studentId": unenrolled_id, "numericGrade": 8.0 }),
        ),
    );
    assert_eq!(
        capture.get("status").and_then(|v| v.as_str()),
        Some("inserted")
    );

    // Double enrollment is reported, not silently ignored.
    let again = request(
        &mut stdin,
        &mut reader,
        "9",
        "enrollment.add",
        json!({
            "groupId": class.group_id,
            "studentId": unenrolled_id,
            "periodId": class.period_id
        }),
    );
    assert_eq!(again.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        again["error"].get("code").and_then(|v| v.as_str()),
        Some("already_enrolled")
    );

    // Updating a student does not disturb the roster.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "students.update",
        json!({ "studentId": unenrolled_id, "lastName": "Nuevo-Apellido" }),
    );
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "students.list",
        json!({ "schoolId": class.school_id }),
    );
    let students = listed["students"].as_array().expect("students");
    assert_eq!(students.len(), 3);
    assert!(students.iter().any(|s| {
        s.get("lastName").and_then(|v| v.as_str()) == Some("Nuevo-Apellido")
    }));

    // Removing the enrollment takes the student back out of the roster.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "enrollment.remove",
        json!({
            "groupId": class.group_id,
            "studentId": unenrolled_id,
            "periodId": class.period_id
        }),
    );
    let roster = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "enrollment.list",
        json!({ "groupId": class.group_id, "periodId": class.period_id }),
    );
    assert_eq!(roster["students"].as_array().expect("students").len(), 2);
}
