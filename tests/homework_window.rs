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

struct Setup {
    teacher_id: String,
    subject_id: String,
    class_id: String,
    student_id: String,
}

fn build_setup(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> Setup {
    let class_id = request_ok(stdin, reader, "c1", "classes.create", json!({ "number": "5C" }))
        ["classId"]
        .as_str()
        .expect("classId")
        .to_string();
    let teacher_id = request_ok(
        stdin,
        reader,
        "t1",
        "actors.create",
        json!({ "role": "teacher", "firstName": "Piotr", "lastName": "Zych" }),
    )["actorId"]
        .as_str()
        .expect("actorId")
        .to_string();
    let subject_id = request_ok(
        stdin,
        reader,
        "s1",
        "subjects.create",
        json!({ "name": "Biology" }),
    )["subjectId"]
        .as_str()
        .expect("subjectId")
        .to_string();
    let student_id = request_ok(
        stdin,
        reader,
        "st1",
        "actors.create",
        json!({
            "role": "student",
            "firstName": "Ola",
            "lastName": "Maj",
            "classId": class_id
        }),
    )["actorId"]
        .as_str()
        .expect("actorId")
        .to_string();
    Setup {
        teacher_id,
        subject_id,
        class_id,
        student_id,
    }
}

fn create_homework(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    setup: &Setup,
    title: &str,
    completion_date: &str,
) -> String {
    request_ok(
        stdin,
        reader,
        id,
        "homework.create",
        json!({
            "classId": setup.class_id,
            "teacherId": setup.teacher_id,
            "subjectId": setup.subject_id,
            "title": title,
            "description": "see textbook",
            "completionDate": completion_date
        }),
    )["homeworkId"]
        .as_str()
        .expect("homeworkId")
        .to_string()
}

#[test]
fn current_window_keeps_seven_days_past() {
    let workspace = temp_dir("schoold-homework-window");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let setup = build_setup(&mut stdin, &mut reader);

    // As of 2026-09-15: due 7 days ago is still current, 8 days ago is not.
    create_homework(&mut stdin, &mut reader, "hw1", &setup, "Edge", "2026-09-08");
    create_homework(&mut stdin, &mut reader, "hw2", &setup, "Stale", "2026-09-07");
    create_homework(&mut stdin, &mut reader, "hw3", &setup, "Future", "2026-10-01");

    let all = request_ok(
        &mut stdin,
        &mut reader,
        "list-all",
        "homework.list",
        json!({ "actorId": setup.student_id }),
    );
    assert_eq!(all["homework"].as_array().expect("homework").len(), 3);

    let current = request_ok(
        &mut stdin,
        &mut reader,
        "list-cur",
        "homework.list",
        json!({ "actorId": setup.student_id, "onlyCurrent": true, "asOf": "2026-09-15" }),
    );
    let titles: Vec<&str> = current["homework"]
        .as_array()
        .expect("homework")
        .iter()
        .map(|h| h["title"].as_str().expect("title"))
        .collect();
    assert!(titles.contains(&"Edge"), "got {:?}", titles);
    assert!(titles.contains(&"Future"), "got {:?}", titles);
    assert!(!titles.contains(&"Stale"), "got {:?}", titles);
}

#[test]
fn submissions_and_progress() {
    let workspace = temp_dir("schoold-homework-progress");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let setup = build_setup(&mut stdin, &mut reader);
    // Second student in the same class, never submits.
    request_ok(
        &mut stdin,
        &mut reader,
        "st2",
        "actors.create",
        json!({
            "role": "student",
            "firstName": "Kuba",
            "lastName": "Rak",
            "classId": setup.class_id
        }),
    );
    let homework_id = create_homework(&mut stdin, &mut reader, "hw1", &setup, "Essay", "2026-10-01");

    let before = request_ok(
        &mut stdin,
        &mut reader,
        "p0",
        "homework.progress",
        json!({ "homeworkId": homework_id }),
    );
    assert_eq!(before["submittedCount"], json!(0));
    assert_eq!(before["totalCount"], json!(2));

    request_ok(
        &mut stdin,
        &mut reader,
        "sub1",
        "homework.submit",
        json!({
            "homeworkId": homework_id,
            "studentId": setup.student_id,
            "content": "draft one",
            "submittedAt": "2026-09-20"
        }),
    );
    // A second submission from the same student does not inflate the count.
    request_ok(
        &mut stdin,
        &mut reader,
        "sub2",
        "homework.submit",
        json!({
            "homeworkId": homework_id,
            "studentId": setup.student_id,
            "content": "draft two",
            "submittedAt": "2026-09-21"
        }),
    );

    let after = request_ok(
        &mut stdin,
        &mut reader,
        "p1",
        "homework.progress",
        json!({ "homeworkId": homework_id }),
    );
    assert_eq!(after["submittedCount"], json!(1));
    assert_eq!(after["totalCount"], json!(2));
}

#[test]
fn submission_requires_enrollment() {
    let workspace = temp_dir("schoold-homework-enrollment");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let setup = build_setup(&mut stdin, &mut reader);
    let homework_id = create_homework(&mut stdin, &mut reader, "hw1", &setup, "Essay", "2026-10-01");

    let stray = request_ok(
        &mut stdin,
        &mut reader,
        "st-x",
        "actors.create",
        json!({ "role": "student", "firstName": "Zofia", "lastName": "Obca" }),
    )["actorId"]
        .as_str()
        .expect("actorId")
        .to_string();

    let rejected = request(
        &mut stdin,
        &mut reader,
        "sub1",
        "homework.submit",
        json!({ "homeworkId": homework_id, "studentId": stray, "content": "hello" }),
    );
    assert_eq!(rejected["ok"], json!(false));
    assert_eq!(
        rejected["error"]["details"]["invariant"],
        json!("student_not_in_class")
    );
}
