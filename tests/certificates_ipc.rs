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

fn seed_student_and_group(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    email: &str,
    group_name: &str,
) -> (i64, i64) {
    let created = request_ok(
        stdin,
        reader,
        "s1",
        "students.create",
        json!({ "name": "Ana Coder", "email": email }),
    );
    let student_id = created
        .get("studentId")
        .and_then(|v| v.as_i64())
        .expect("studentId");
    let group = request_ok(
        stdin,
        reader,
        "s2",
        "classGroups.create",
        json!({ "name": group_name, "studentIds": [student_id] }),
    );
    let group_id = group
        .get("classGroupId")
        .and_then(|v| v.as_i64())
        .expect("classGroupId");
    (student_id, group_id)
}

#[test]
fn issue_is_idempotent_per_student_and_group() {
    let workspace = temp_dir("coderoom-certs");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (student_id, group_id) =
        seed_student_and_group(&mut stdin, &mut reader, "ana@cert.com", "Turma Cert");

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "certificates.issue",
        json!({ "studentId": student_id, "classGroupId": group_id }),
    );
    assert_eq!(first.get("alreadyIssued").and_then(|v| v.as_bool()), Some(false));
    let cert = first.get("certificate").expect("certificate");
    let cert_id = cert.get("id").and_then(|v| v.as_str()).expect("id").to_string();
    let code = cert
        .get("validationCode")
        .and_then(|v| v.as_str())
        .expect("validationCode")
        .to_string();
    assert_eq!(code.len(), 8);
    assert_eq!(code, code.to_uppercase());

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "certificates.issue",
        json!({ "studentId": student_id, "classGroupId": group_id }),
    );
    assert_eq!(second.get("alreadyIssued").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(
        second
            .get("certificate")
            .and_then(|c| c.get("id"))
            .and_then(|v| v.as_str()),
        Some(cert_id.as_str())
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "certificates.list",
        json!({ "studentId": student_id }),
    );
    assert_eq!(
        listed
            .get("certificates")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(1)
    );

    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "certificates.get",
        json!({ "certificateId": cert_id }),
    );
    assert_eq!(
        fetched
            .get("certificate")
            .and_then(|c| c.get("validationCode"))
            .and_then(|v| v.as_str()),
        Some(code.as_str())
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn validate_answers_instead_of_failing() {
    let workspace = temp_dir("coderoom-certs-validate");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (student_id, group_id) =
        seed_student_and_group(&mut stdin, &mut reader, "ana@v.com", "Turma V");

    let issued = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "certificates.issue",
        json!({ "studentId": student_id, "classGroupId": group_id }),
    );
    let code = issued
        .get("certificate")
        .and_then(|c| c.get("validationCode"))
        .and_then(|v| v.as_str())
        .expect("validationCode")
        .to_string();

    let valid = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "certificates.validate",
        json!({ "validationCode": code }),
    );
    assert_eq!(valid.get("valid").and_then(|v| v.as_bool()), Some(true));
    let cert = valid.get("certificate").expect("certificate");
    assert_eq!(cert.get("studentName").and_then(|v| v.as_str()), Some("Ana Coder"));
    assert_eq!(cert.get("classGroupName").and_then(|v| v.as_str()), Some("Turma V"));

    let unknown = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "certificates.validate",
        json!({ "validationCode": "NOPE0000" }),
    );
    assert_eq!(unknown.get("valid").and_then(|v| v.as_bool()), Some(false));
    assert!(unknown.get("certificate").is_none());

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn issue_and_delete_guard_against_unknown_rows() {
    let workspace = temp_dir("coderoom-certs-guard");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (student_id, group_id) =
        seed_student_and_group(&mut stdin, &mut reader, "ana@gd.com", "Turma G");

    let ghost = request(
        &mut stdin,
        &mut reader,
        "2",
        "certificates.issue",
        json!({ "studentId": 9999, "classGroupId": group_id }),
    );
    assert_eq!(error_code(&ghost), "not_found");

    let ghost_group = request(
        &mut stdin,
        &mut reader,
        "2b",
        "certificates.issue",
        json!({ "studentId": student_id, "classGroupId": 9999 }),
    );
    assert_eq!(error_code(&ghost_group), "not_found");

    let issued = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "certificates.issue",
        json!({ "studentId": student_id, "classGroupId": group_id }),
    );
    let cert_id = issued
        .get("certificate")
        .and_then(|c| c.get("id"))
        .and_then(|v| v.as_str())
        .expect("id")
        .to_string();

    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "certificates.delete",
        json!({ "certificateId": cert_id }),
    );
    let twice = request(
        &mut stdin,
        &mut reader,
        "5",
        "certificates.delete",
        json!({ "certificateId": cert_id }),
    );
    assert_eq!(error_code(&twice), "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
