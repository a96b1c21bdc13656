#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_escolard");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn escolard");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

/// A seeded school with one teacher, one group, one subject, one period
/// and `student_count` enrolled students, built through the same IPC
/// surface the tests exercise.
pub struct Classroom {
    pub school_id: String,
    pub staff_id: String,
    pub group_id: String,
    pub subject_id: String,
    pub period_id: String,
    pub student_ids: Vec<String>,
}

pub fn seed_classroom(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    student_count: usize,
) -> Classroom {
    let mut n = 0usize;
    let mut next_id = move || {
        n += 1;
        format!("seed-{}", n)
    };

    let school = request_ok(
        stdin,
        reader,
        &next_id(),
        "schools.create",
        json!({ "name": "Primaria Benito Juarez", "locality": "Guadalajara" }),
    );
    let school_id = school
        .get("schoolId")
        .and_then(|v| v.as_str())
        .expect("schoolId")
        .to_string();

    let staff = request_ok(
        stdin,
        reader,
        &next_id(),
        "staff.create",
        json!({
            "schoolId": school_id,
            "lastName": "Torres",
            "firstName": "Alma",
            "role": "teacher"
        }),
    );
    let staff_id = staff
        .get("staffId")
        .and_then(|v| v.as_str())
        .expect("staffId")
        .to_string();

    let group = request_ok(
        stdin,
        reader,
        &next_id(),
        "groups.create",
        json!({ "schoolId": school_id, "name": "5A", "gradeLevel": "5" }),
    );
    let group_id = group
        .get("groupId")
        .and_then(|v| v.as_str())
        .expect("groupId")
        .to_string();

    let subject = request_ok(
        stdin,
        reader,
        &next_id(),
        "subjects.create",
        json!({ "schoolId": school_id, "name": "Matematicas", "shortCode": "MAT" }),
    );
    let subject_id = subject
        .get("subjectId")
        .and_then(|v| v.as_str())
        .expect("subjectId")
        .to_string();

    let period = request_ok(
        stdin,
        reader,
        &next_id(),
        "periods.create",
        json!({
            "schoolId": school_id,
            "name": "Bimestre 1",
            "startsOn": "2025-09-01",
            "endsOn": "2025-10-31"
        }),
    );
    let period_id = period
        .get("periodId")
        .and_then(|v| v.as_str())
        .expect("periodId")
        .to_string();

    let mut student_ids = Vec::with_capacity(student_count);
    for i in 0..student_count {
        let student = request_ok(
            stdin,
            reader,
            &next_id(),
            "students.create",
            json!({
                "schoolId": school_id,
                "lastName": format!("Alumno{:02}", i),
                "firstName": "Test",
                "enrollmentNo": format!("MAT-{:04}", i)
            }),
        );
        let student_id = student
            .get("studentId")
            .and_then(|v| v.as_str())
            .expect("studentId")
            .to_string();
        let _ = request_ok(
            stdin,
            reader,
            &next_id(),
            "enrollment.add",
            json!({
                "groupId": group_id,
                "studentId": student_id,
                "periodId": period_id
            }),
        );
        student_ids.push(student_id);
    }

    Classroom {
        school_id,
        staff_id,
        group_id,
        subject_id,
        period_id,
        student_ids,
    }
}

impl Classroom {
    pub fn scope_params(&self) -> serde_json::Value {
        json!({
            "schoolId": self.school_id,
            "groupId": self.group_id,
            "subjectId": self.subject_id,
            "periodId": self.period_id,
            "capturedByStaffId": self.staff_id,
        })
    }
}

/// Merges extra keys into a scope params object.
pub fn with_params(base: serde_json::Value, extra: serde_json::Value) -> serde_json::Value {
    let mut obj = base.as_object().cloned().expect("base params object");
    for (k, v) in extra.as_object().cloned().expect("extra params object") {
        obj.insert(k, v);
    }
    serde_json::Value::Object(obj)
}
