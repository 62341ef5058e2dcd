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
    let exe = env!("CARGO_BIN_EXE_coderoomd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn coderoomd");
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
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
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
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "expected ok for {}: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or(serde_json::Value::Null)
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

fn create_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    name: &str,
    email: &str,
) -> i64 {
    let created = request_ok(
        stdin,
        reader,
        id,
        "students.create",
        json!({ "name": name, "email": email }),
    );
    created
        .get("studentId")
        .and_then(|v| v.as_i64())
        .expect("studentId")
}

fn attendance_by_student(rows: &[serde_json::Value]) -> Vec<(i64, String)> {
    let mut out = rows
        .iter()
        .map(|r| {
            (
                r.get("studentId").and_then(|v| v.as_i64()).expect("studentId"),
                r.get("status")
                    .and_then(|v| v.as_str())
                    .expect("status")
                    .to_string(),
            )
        })
        .collect::<Vec<_>>();
    out.sort();
    out
}

#[test]
fn roll_call_materializes_attendance_rows() {
    let workspace = temp_dir("coderoom-sessions");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let a = create_student(&mut stdin, &mut reader, "2", "Ana", "ana@s.com");
    let b = create_student(&mut stdin, &mut reader, "3", "Bia", "bia@s.com");
    let c = create_student(&mut stdin, &mut reader, "4", "Caio", "caio@s.com");

    let group = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "classGroups.create",
        json!({ "name": "Turma S", "studentIds": [a, b, c] }),
    );
    let group_id = group
        .get("classGroupId")
        .and_then(|v| v.as_i64())
        .expect("classGroupId");

    let session = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "sessions.create",
        json!({
            "classGroupId": group_id,
            "date": "2026-05-04",
            "observation": "robots week",
            "presentStudentIds": [a, c]
        }),
    );
    let session_id = session
        .get("sessionId")
        .and_then(|v| v.as_i64())
        .expect("sessionId");

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "attendance.list",
        json!({ "classSessionId": session_id }),
    );
    let rows = listed
        .get("attendances")
        .and_then(|v| v.as_array())
        .expect("attendances");
    assert_eq!(
        attendance_by_student(rows),
        vec![
            (a, "present".to_string()),
            (b, "absent".to_string()),
            (c, "present".to_string()),
        ]
    );

    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "sessions.get",
        json!({ "sessionId": session_id }),
    );
    let stored_ids = fetched
        .get("session")
        .and_then(|s| s.get("presentStudentIds"))
        .and_then(|v| v.as_array())
        .expect("presentStudentIds")
        .iter()
        .filter_map(|v| v.as_i64())
        .collect::<Vec<_>>();
    assert_eq!(stored_ids, vec![a, c]);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn resaving_roll_call_upserts_instead_of_duplicating() {
    let workspace = temp_dir("coderoom-sessions-resave");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let a = create_student(&mut stdin, &mut reader, "2", "Ana", "ana@r.com");
    let b = create_student(&mut stdin, &mut reader, "3", "Bia", "bia@r.com");
    let group = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "classGroups.create",
        json!({ "name": "Turma R", "studentIds": [a, b] }),
    );
    let group_id = group
        .get("classGroupId")
        .and_then(|v| v.as_i64())
        .expect("classGroupId");

    let session = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "sessions.create",
        json!({
            "classGroupId": group_id,
            "date": "2026-05-11",
            "presentStudentIds": [a]
        }),
    );
    let session_id = session
        .get("sessionId")
        .and_then(|v| v.as_i64())
        .expect("sessionId");

    // Flip the roll call and make sure the rows flip with it.
    request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "sessions.update",
        json!({ "sessionId": session_id, "presentStudentIds": [b] }),
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "attendance.list",
        json!({ "classSessionId": session_id }),
    );
    let rows = listed
        .get("attendances")
        .and_then(|v| v.as_array())
        .expect("attendances");
    assert_eq!(rows.len(), 2);
    assert_eq!(
        attendance_by_student(rows),
        vec![(a, "absent".to_string()), (b, "present".to_string())]
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn moving_a_session_between_groups_drops_stale_attendance() {
    let workspace = temp_dir("coderoom-sessions-move");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let a = create_student(&mut stdin, &mut reader, "2", "Ana", "ana@mv.com");
    let b = create_student(&mut stdin, &mut reader, "3", "Bia", "bia@mv.com");
    let g1 = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "classGroups.create",
        json!({ "name": "Turma Um", "studentIds": [a] }),
    )
    .get("classGroupId")
    .and_then(|v| v.as_i64())
    .expect("classGroupId");
    let g2 = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "classGroups.create",
        json!({ "name": "Turma Dois", "studentIds": [b] }),
    )
    .get("classGroupId")
    .and_then(|v| v.as_i64())
    .expect("classGroupId");

    let session = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "sessions.create",
        json!({ "classGroupId": g1, "date": "2026-05-25", "presentStudentIds": [a] }),
    );
    let session_id = session
        .get("sessionId")
        .and_then(|v| v.as_i64())
        .expect("sessionId");

    request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "sessions.update",
        json!({ "sessionId": session_id, "classGroupId": g2, "presentStudentIds": [b] }),
    );

    // Only the new group's roster remains on the session.
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "attendance.list",
        json!({ "classSessionId": session_id }),
    );
    let rows = listed
        .get("attendances")
        .and_then(|v| v.as_array())
        .expect("attendances");
    assert_eq!(attendance_by_student(rows), vec![(b, "present".to_string())]);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn manual_set_validates_status_and_session() {
    let workspace = temp_dir("coderoom-attendance-set");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let a = create_student(&mut stdin, &mut reader, "2", "Ana", "ana@m.com");
    let group = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "classGroups.create",
        json!({ "name": "Turma M", "studentIds": [a] }),
    );
    let group_id = group
        .get("classGroupId")
        .and_then(|v| v.as_i64())
        .expect("classGroupId");
    let session = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "sessions.create",
        json!({ "classGroupId": group_id, "date": "2026-05-18", "presentStudentIds": [] }),
    );
    let session_id = session
        .get("sessionId")
        .and_then(|v| v.as_i64())
        .expect("sessionId");

    let bad_status = request(
        &mut stdin,
        &mut reader,
        "5",
        "attendance.set",
        json!({ "classSessionId": session_id, "studentId": a, "status": "vanished" }),
    );
    assert_eq!(error_code(&bad_status), "bad_params");

    let bad_session = request(
        &mut stdin,
        &mut reader,
        "6",
        "attendance.set",
        json!({ "classSessionId": 9999, "studentId": a, "status": "late" }),
    );
    assert_eq!(error_code(&bad_session), "not_found");

    let set = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "attendance.set",
        json!({ "classSessionId": session_id, "studentId": a, "status": "late" }),
    );
    assert_eq!(set.get("status").and_then(|v| v.as_str()), Some("late"));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "attendance.list",
        json!({ "classSessionId": session_id }),
    );
    let rows = listed
        .get("attendances")
        .and_then(|v| v.as_array())
        .expect("attendances");
    assert_eq!(attendance_by_student(rows), vec![(a, "late".to_string())]);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn deleting_a_session_removes_its_attendance() {
    let workspace = temp_dir("coderoom-sessions-delete");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let a = create_student(&mut stdin, &mut reader, "2", "Ana", "ana@x.com");
    let group = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "classGroups.create",
        json!({ "name": "Turma X", "studentIds": [a] }),
    );
    let group_id = group
        .get("classGroupId")
        .and_then(|v| v.as_i64())
        .expect("classGroupId");
    let session = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "sessions.create",
        json!({ "classGroupId": group_id, "date": "2026-06-01", "presentStudentIds": [a] }),
    );
    let session_id = session
        .get("sessionId")
        .and_then(|v| v.as_i64())
        .expect("sessionId");

    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "sessions.delete",
        json!({ "sessionId": session_id }),
    );

    let gone = request(
        &mut stdin,
        &mut reader,
        "6",
        "sessions.get",
        json!({ "sessionId": session_id }),
    );
    assert_eq!(error_code(&gone), "not_found");

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "attendance.list",
        json!({ "classSessionId": session_id }),
    );
    assert_eq!(
        listed
            .get("attendances")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
