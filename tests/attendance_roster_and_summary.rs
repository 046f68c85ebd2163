use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
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

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_schoold");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schoold");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
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

fn request_ok(
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

struct Timetable {
    teacher_id: String,
    lesson_id: String,
    student_ids: Vec<String>,
    subject_id: String,
}

fn build_timetable(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    students: usize,
) -> Timetable {
    let class_id = request_ok(stdin, reader, "c1", "classes.create", json!({ "number": "3B" }))
        ["classId"]
        .as_str()
        .expect("classId")
        .to_string();
    let teacher_id = request_ok(
        stdin,
        reader,
        "t1",
        "actors.create",
        json!({ "role": "teacher", "firstName": "Ewa", "lastName": "Lis" }),
    )["actorId"]
        .as_str()
        .expect("actorId")
        .to_string();
    let subject_id = request_ok(
        stdin,
        reader,
        "s1",
        "subjects.create",
        json!({ "name": "History" }),
    )["subjectId"]
        .as_str()
        .expect("subjectId")
        .to_string();
    let mut student_ids = Vec::new();
    for i in 0..students {
        let id = request_ok(
            stdin,
            reader,
            &format!("st{}", i),
            "actors.create",
            json!({
                "role": "student",
                "firstName": format!("Student{}", i),
                "lastName": "Testowy",
                "classId": class_id
            }),
        )["actorId"]
            .as_str()
            .expect("actorId")
            .to_string();
        student_ids.push(id);
    }
    let lesson_id = request_ok(
        stdin,
        reader,
        "l1",
        "lessons.create",
        json!({
            "subjectId": subject_id,
            "teacherId": teacher_id,
            "classId": class_id,
            "weekday": 2,
            "timeSlot": 3,
            "classroom": "12"
        }),
    )["lessonId"]
        .as_str()
        .expect("lessonId")
        .to_string();
    Timetable {
        teacher_id,
        lesson_id,
        student_ids,
        subject_id,
    }
}

#[test]
fn session_creates_one_row_per_enrolled_student() {
    let workspace = temp_dir("schoold-attendance-roster");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let tt = build_timetable(&mut stdin, &mut reader, 5);

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "ses1",
        "sessions.create",
        json!({ "lessonId": tt.lesson_id, "date": "2026-09-07", "topic": "Intro" }),
    );
    assert_eq!(created["attendanceRows"], json!(5));
    let session_id = created["sessionId"].as_str().expect("sessionId").to_string();

    // Re-deriving the roster is idempotent: no new rows while enrollment is
    // unchanged.
    let refreshed = request_ok(
        &mut stdin,
        &mut reader,
        "ref1",
        "attendance.refresh",
        json!({ "sessionId": session_id }),
    );
    assert_eq!(refreshed["attendanceRows"], json!(0));
}

#[test]
fn summary_counts_and_percentages() {
    let workspace = temp_dir("schoold-attendance-summary");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let tt = build_timetable(&mut stdin, &mut reader, 1);
    let student_id = tt.student_ids[0].clone();

    // Four sessions, one attendance status each.
    let statuses = ["present", "absent", "exempt", "excused"];
    for (i, status) in statuses.iter().enumerate() {
        let created = request_ok(
            &mut stdin,
            &mut reader,
            &format!("ses{}", i),
            "sessions.create",
            json!({
                "lessonId": tt.lesson_id,
                "date": format!("2026-09-{:02}", 7 + i),
                "topic": "Lesson"
            }),
        );
        let session_id = created["sessionId"].as_str().expect("sessionId");
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("set{}", i),
            "attendance.set",
            json!({ "sessionId": session_id, "studentId": student_id, "status": status }),
        );
    }

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "sum1",
        "attendance.summary",
        json!({
            "actorId": tt.teacher_id,
            "studentId": student_id,
            "subjectId": tt.subject_id
        }),
    );
    assert_eq!(summary["total"], json!(4));
    let by_status = summary["byStatus"].as_array().expect("byStatus");
    for entry in by_status {
        let status = entry["status"].as_str().expect("status");
        if status == "none" {
            assert_eq!(entry["count"], json!(0));
            assert_eq!(entry["percentage"], json!(0.0));
        } else {
            assert_eq!(entry["count"], json!(1), "status {}", status);
            assert_eq!(entry["percentage"], json!(25.0), "status {}", status);
        }
    }
}

#[test]
fn attendance_write_validation() {
    let workspace = temp_dir("schoold-attendance-validation");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let tt = build_timetable(&mut stdin, &mut reader, 1);
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "ses1",
        "sessions.create",
        json!({ "lessonId": tt.lesson_id, "date": "2026-09-07", "topic": "Intro" }),
    );
    let session_id = created["sessionId"].as_str().expect("sessionId").to_string();

    let bad_status = request(
        &mut stdin,
        &mut reader,
        "b1",
        "attendance.set",
        json!({
            "sessionId": session_id,
            "studentId": tt.student_ids[0],
            "status": "vanished"
        }),
    );
    assert_eq!(bad_status["ok"], json!(false));
    assert_eq!(bad_status["error"]["details"]["invariant"], json!("bad_status"));

    // A student outside the session's class is rejected, not silently added.
    let stray = request_ok(
        &mut stdin,
        &mut reader,
        "st-x",
        "actors.create",
        json!({ "role": "student", "firstName": "Obcy", "lastName": "Uczen" }),
    )["actorId"]
        .as_str()
        .expect("actorId")
        .to_string();
    let not_in_class = request(
        &mut stdin,
        &mut reader,
        "b2",
        "attendance.set",
        json!({ "sessionId": session_id, "studentId": stray, "status": "present" }),
    );
    assert_eq!(
        not_in_class["error"]["details"]["invariant"],
        json!("student_not_in_class")
    );
}
