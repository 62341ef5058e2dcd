use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{list_result, param_i64, param_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::{OptionalExtension, Row};
use serde_json::json;

const STATUSES: [&str; 3] = ["present", "absent", "late"];

fn attendance_json(row: &Row) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": row.get::<_, i64>(0)?,
        "classSessionId": row.get::<_, i64>(1)?,
        "studentId": row.get::<_, i64>(2)?,
        "status": row.get::<_, String>(3)?,
        "createdAt": row.get::<_, Option<String>>(4)?,
        "updatedAt": row.get::<_, Option<String>>(5)?,
    }))
}

fn handle_attendance_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let cols = "id, class_session_id, student_id, status, created_at, updated_at";
    let rows = if let Some(session_id) = param_i64(&req.params, "classSessionId") {
        let sql = format!(
            "SELECT {cols} FROM attendances WHERE class_session_id = ? ORDER BY student_id"
        );
        conn.prepare(&sql).and_then(|mut stmt| {
            stmt.query_map([session_id], attendance_json)
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        })
    } else {
        let sql = format!("SELECT {cols} FROM attendances ORDER BY class_session_id, student_id");
        conn.prepare(&sql).and_then(|mut stmt| {
            stmt.query_map([], attendance_json)
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        })
    };

    match rows {
        Ok(attendances) => ok(
            &req.id,
            json!({ "attendances": list_result(&req.params, attendances) }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_attendance_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (Some(session_id), Some(student_id)) = (
        param_i64(&req.params, "classSessionId"),
        param_i64(&req.params, "studentId"),
    ) else {
        return err(
            &req.id,
            "bad_params",
            "missing classSessionId or studentId",
            None,
        );
    };
    let status = match param_str(&req.params, "status") {
        Some(s) if STATUSES.contains(&s) => s,
        Some(s) => {
            return err(
                &req.id,
                "bad_params",
                format!("invalid status: {}", s),
                Some(json!({ "allowed": STATUSES })),
            )
        }
        None => return err(&req.id, "bad_params", "missing status", None),
    };

    let session_exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM class_sessions WHERE id = ?",
            [session_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if session_exists.is_none() {
        return err(&req.id, "not_found", "session not found", None);
    }

    let now = db::now_iso();
    if let Err(e) = conn.execute(
        "INSERT INTO attendances(class_session_id, student_id, status, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(class_session_id, student_id)
         DO UPDATE SET status = excluded.status, updated_at = excluded.updated_at",
        (session_id, student_id, status, &now, &now),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "attendances" })),
        );
    }

    ok(&req.id, json!({ "ok": true, "status": status }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.list" => Some(handle_attendance_list(state, req)),
        "attendance.set" => Some(handle_attendance_set(state, req)),
        _ => None,
    }
}
