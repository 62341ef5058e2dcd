use crate::auth;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{list_result, param_i64, param_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::json;

const STUDENT_COLS: &str = "id, name, email, enrollment_number, birth_date, created_at, updated_at";

fn student_json(row: &Row) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": row.get::<_, i64>(0)?,
        "name": row.get::<_, String>(1)?,
        "email": row.get::<_, String>(2)?,
        "enrollmentNumber": row.get::<_, Option<String>>(3)?,
        "birthDate": row.get::<_, Option<String>>(4)?,
        "createdAt": row.get::<_, Option<String>>(5)?,
        "updatedAt": row.get::<_, Option<String>>(6)?,
    }))
}

fn email_taken(conn: &Connection, email: &str, exclude_id: Option<i64>) -> rusqlite::Result<bool> {
    let existing: Option<i64> = conn
        .query_row("SELECT id FROM students WHERE email = ?", [email], |r| {
            r.get(0)
        })
        .optional()?;
    Ok(match (existing, exclude_id) {
        (Some(found), Some(me)) => found != me,
        (Some(_), None) => true,
        (None, _) => false,
    })
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let sql = format!("SELECT {STUDENT_COLS} FROM students ORDER BY id");
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], student_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(
            &req.id,
            json!({ "students": list_result(&req.params, students) }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(student_id) = param_i64(&req.params, "studentId") else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };

    let sql = format!("SELECT {STUDENT_COLS} FROM students WHERE id = ?");
    match conn.query_row(&sql, [student_id], student_json).optional() {
        Ok(Some(student)) => ok(&req.id, json!({ "student": student })),
        Ok(None) => err(&req.id, "not_found", "student not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match param_str(&req.params, "name") {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing name", None),
    };
    let email = match param_str(&req.params, "email") {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing email", None),
    };
    let enrollment_number = param_str(&req.params, "enrollmentNumber").map(|s| s.to_string());
    let birth_date = param_str(&req.params, "birthDate").map(|s| s.to_string());
    let password_hash = param_str(&req.params, "password").map(auth::hash_password);

    match email_taken(conn, &email, None) {
        Ok(true) => return err(&req.id, "email_taken", "email already registered", None),
        Ok(false) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let now = db::now_iso();
    if let Err(e) = conn.execute(
        "INSERT INTO students(name, email, enrollment_number, birth_date, password_hash,
                              created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &name,
            &email,
            &enrollment_number,
            &birth_date,
            &password_hash,
            &now,
            &now,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    let student_id = conn.last_insert_rowid();
    ok(
        &req.id,
        json!({ "studentId": student_id, "name": name, "email": email }),
    )
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(student_id) = param_i64(&req.params, "studentId") else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing patch", None);
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    if let Some(email) = patch.get("email").and_then(|v| v.as_str()) {
        match email_taken(conn, email.trim(), Some(student_id)) {
            Ok(true) => return err(&req.id, "email_taken", "email already registered", None),
            Ok(false) => {}
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    // Only whitelisted fields are patchable; a fresh password gets
    // re-hashed before it is stored.
    let mut sets: Vec<String> = Vec::new();
    let mut args: Vec<rusqlite::types::Value> = Vec::new();
    let text_fields = [
        ("name", "name"),
        ("email", "email"),
        ("enrollmentNumber", "enrollment_number"),
        ("birthDate", "birth_date"),
    ];
    for (key, column) in text_fields {
        if let Some(v) = patch.get(key).and_then(|v| v.as_str()) {
            sets.push(format!("{} = ?", column));
            args.push(rusqlite::types::Value::Text(v.trim().to_string()));
        }
    }
    if let Some(password) = patch.get("password").and_then(|v| v.as_str()) {
        sets.push("password_hash = ?".to_string());
        args.push(rusqlite::types::Value::Text(auth::hash_password(password)));
    }
    if sets.is_empty() {
        return err(&req.id, "bad_params", "patch has no recognized fields", None);
    }

    sets.push("updated_at = ?".to_string());
    args.push(rusqlite::types::Value::Text(db::now_iso()));
    args.push(rusqlite::types::Value::Integer(student_id));

    let sql = format!("UPDATE students SET {} WHERE id = ?", sets.join(", "));
    if let Err(e) = conn.execute(&sql, rusqlite::params_from_iter(args)) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(student_id) = param_i64(&req.params, "studentId") else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicit dependency order; the schema has no ON DELETE CASCADE.
    for (sql, table) in [
        ("DELETE FROM attendances WHERE student_id = ?", "attendances"),
        (
            "DELETE FROM project_submissions WHERE student_id = ?",
            "project_submissions",
        ),
        (
            "DELETE FROM certificates WHERE student_id = ?",
            "certificates",
        ),
        (
            "DELETE FROM class_group_students WHERE student_id = ?",
            "class_group_students",
        ),
        ("DELETE FROM students WHERE id = ?", "students"),
    ] {
        if let Err(e) = tx.execute(sql, [student_id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": table })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.get" => Some(handle_students_get(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
