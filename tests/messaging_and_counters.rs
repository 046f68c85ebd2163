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

fn create_actor(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    params: serde_json::Value,
) -> String {
    request_ok(stdin, reader, id, "actors.create", params)["actorId"]
        .as_str()
        .expect("actorId")
        .to_string()
}

#[test]
fn message_fanout_and_read_tracking() {
    let workspace = temp_dir("schoold-messages");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let teacher = create_actor(
        &mut stdin,
        &mut reader,
        "t1",
        json!({ "role": "teacher", "firstName": "Ada", "lastName": "Klon" }),
    );
    let r1 = create_actor(
        &mut stdin,
        &mut reader,
        "st1",
        json!({ "role": "student", "firstName": "Jas", "lastName": "Bor" }),
    );
    let r2 = create_actor(
        &mut stdin,
        &mut reader,
        "st2",
        json!({ "role": "student", "firstName": "Mia", "lastName": "Dab" }),
    );

    let sent = request_ok(
        &mut stdin,
        &mut reader,
        "m1",
        "messages.send",
        json!({
            "authorId": teacher,
            "title": "Trip",
            "content": "Bring lunch.",
            "receiverIds": [r1, r2],
            "sentAt": "2026-09-10"
        }),
    );
    assert_eq!(sent["statuses"], json!(2));
    let message_id = sent["messageId"].as_str().expect("messageId").to_string();

    // Each receiver sees the message unread; the author is not a receiver.
    let inbox = request_ok(
        &mut stdin,
        &mut reader,
        "list1",
        "messages.list",
        json!({ "actorId": r1 }),
    );
    let messages = inbox["messages"].as_array().expect("messages");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["read"], json!(false));
    let authors_inbox = request_ok(
        &mut stdin,
        &mut reader,
        "list2",
        "messages.list",
        json!({ "actorId": teacher }),
    );
    assert!(authors_inbox["messages"].as_array().expect("messages").is_empty());

    // Marking read is per receiver.
    request_ok(
        &mut stdin,
        &mut reader,
        "read1",
        "messages.markRead",
        json!({ "actorId": r1, "messageId": message_id }),
    );
    let inbox = request_ok(
        &mut stdin,
        &mut reader,
        "list3",
        "messages.list",
        json!({ "actorId": r1 }),
    );
    assert_eq!(inbox["messages"][0]["read"], json!(true));
    let other_inbox = request_ok(
        &mut stdin,
        &mut reader,
        "list4",
        "messages.list",
        json!({ "actorId": r2 }),
    );
    assert_eq!(other_inbox["messages"][0]["read"], json!(false));

    // Non-receivers cannot mark it, and learn nothing from trying.
    let denied = request(
        &mut stdin,
        &mut reader,
        "read2",
        "messages.markRead",
        json!({ "actorId": teacher, "messageId": message_id }),
    );
    assert_eq!(denied["error"]["code"], json!("not_found"));

    let no_receivers = request(
        &mut stdin,
        &mut reader,
        "m2",
        "messages.send",
        json!({
            "authorId": teacher,
            "title": "Empty",
            "content": "x",
            "receiverIds": []
        }),
    );
    assert_eq!(no_receivers["error"]["code"], json!("bad_params"));
}

#[test]
fn event_scope_decides_recipients() {
    let workspace = temp_dir("schoold-events");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let class_id = request_ok(&mut stdin, &mut reader, "c1", "classes.create", json!({ "number": "9A" }))
        ["classId"]
        .as_str()
        .expect("classId")
        .to_string();
    let pupil = create_actor(
        &mut stdin,
        &mut reader,
        "st1",
        json!({ "role": "student", "firstName": "Tom", "lastName": "Klos", "classId": class_id }),
    );
    let parent = create_actor(
        &mut stdin,
        &mut reader,
        "p1",
        json!({ "role": "parent", "firstName": "Eda", "lastName": "Klos", "childId": pupil }),
    );
    let unrelated = create_actor(
        &mut stdin,
        &mut reader,
        "st2",
        json!({ "role": "student", "firstName": "Ula", "lastName": "Poza" }),
    );

    let scoped = request_ok(
        &mut stdin,
        &mut reader,
        "e1",
        "events.create",
        json!({
            "title": "Class trip",
            "description": "Museum visit",
            "date": "2026-10-05",
            "classId": class_id,
            "asOf": "2026-09-01"
        }),
    );
    // Student plus their parent; the unrelated student is not in scope.
    assert_eq!(scoped["statuses"], json!(2));

    let visible = request_ok(
        &mut stdin,
        &mut reader,
        "q1",
        "events.list",
        json!({ "actorId": parent }),
    );
    assert_eq!(visible["events"].as_array().expect("events").len(), 1);
    let hidden = request_ok(
        &mut stdin,
        &mut reader,
        "q2",
        "events.list",
        json!({ "actorId": unrelated }),
    );
    assert!(hidden["events"].as_array().expect("events").is_empty());

    // A global event reaches every actor.
    let global = request_ok(
        &mut stdin,
        &mut reader,
        "e2",
        "events.create",
        json!({
            "title": "School day",
            "description": "No classes",
            "date": "2026-11-11",
            "asOf": "2026-09-01"
        }),
    );
    assert_eq!(global["statuses"], json!(3));

    // Past or same-day dates are rejected.
    let stale = request(
        &mut stdin,
        &mut reader,
        "e3",
        "events.create",
        json!({
            "title": "Yesterday",
            "description": "too late",
            "date": "2026-09-01",
            "asOf": "2026-09-01"
        }),
    );
    assert_eq!(
        stale["error"]["details"]["invariant"],
        json!("event_date_not_future")
    );
}

#[test]
fn unseen_counters_follow_role_and_seen_flags() {
    let workspace = temp_dir("schoold-counters");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let class_id = request_ok(&mut stdin, &mut reader, "c1", "classes.create", json!({ "number": "7B" }))
        ["classId"]
        .as_str()
        .expect("classId")
        .to_string();
    let teacher = create_actor(
        &mut stdin,
        &mut reader,
        "t1",
        json!({ "role": "teacher", "firstName": "Rob", "lastName": "Sen" }),
    );
    let subject = request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "subjects.create",
        json!({ "name": "Music" }),
    )["subjectId"]
        .as_str()
        .expect("subjectId")
        .to_string();
    let pupil = create_actor(
        &mut stdin,
        &mut reader,
        "st1",
        json!({ "role": "student", "firstName": "Nel", "lastName": "Maj", "classId": class_id }),
    );
    let parent = create_actor(
        &mut stdin,
        &mut reader,
        "p1",
        json!({ "role": "parent", "firstName": "Gra", "lastName": "Maj", "childId": pupil }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "l1",
        "lessons.create",
        json!({
            "subjectId": subject,
            "teacherId": teacher,
            "classId": class_id,
            "weekday": 5,
            "timeSlot": 2,
            "classroom": "aula"
        }),
    );
    let category = request_ok(
        &mut stdin,
        &mut reader,
        "gc1",
        "gradeCategories.create",
        json!({
            "teacherId": teacher,
            "subjectId": subject,
            "classId": class_id,
            "name": "Singing"
        }),
    )["categoryId"]
        .as_str()
        .expect("categoryId")
        .to_string();
    let grade_id = request_ok(
        &mut stdin,
        &mut reader,
        "g1",
        "grades.create",
        json!({
            "categoryId": category,
            "studentId": pupil,
            "teacherId": teacher,
            "value": 5.0,
            "weight": 1
        }),
    )["gradeId"]
        .as_str()
        .expect("gradeId")
        .to_string();
    request_ok(
        &mut stdin,
        &mut reader,
        "n1",
        "notes.create",
        json!({ "teacherId": teacher, "studentId": pupil, "text": "talks in class" }),
    );

    let student_counters = request_ok(
        &mut stdin,
        &mut reader,
        "cnt1",
        "counters.unseen",
        json!({ "actorId": pupil }),
    );
    assert_eq!(student_counters["grades"], json!(1));
    assert_eq!(student_counters["notes"], json!(1));
    let parent_counters = request_ok(
        &mut stdin,
        &mut reader,
        "cnt2",
        "counters.unseen",
        json!({ "actorId": parent }),
    );
    assert_eq!(parent_counters["grades"], json!(1));
    assert_eq!(parent_counters["notes"], json!(1));

    // Teachers do not receive grades or notes at all.
    let teacher_counters = request_ok(
        &mut stdin,
        &mut reader,
        "cnt3",
        "counters.unseen",
        json!({ "actorId": teacher }),
    );
    assert!(teacher_counters["grades"].is_null());
    assert!(teacher_counters["notes"].is_null());

    // The student's seen flag is independent of the parent's.
    request_ok(
        &mut stdin,
        &mut reader,
        "seen1",
        "grades.markSeen",
        json!({ "actorId": pupil, "gradeId": grade_id }),
    );
    let student_counters = request_ok(
        &mut stdin,
        &mut reader,
        "cnt4",
        "counters.unseen",
        json!({ "actorId": pupil }),
    );
    assert_eq!(student_counters["grades"], json!(0));
    let parent_counters = request_ok(
        &mut stdin,
        &mut reader,
        "cnt5",
        "counters.unseen",
        json!({ "actorId": parent }),
    );
    assert_eq!(parent_counters["grades"], json!(1));
}
