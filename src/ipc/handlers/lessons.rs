use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{list_result, param_f64, param_i64, param_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::{OptionalExtension, Row};
use serde_json::json;

fn lesson_json(row: &Row) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": row.get::<_, i64>(0)?,
        "classGroupId": row.get::<_, Option<i64>>(1)?,
        "title": row.get::<_, String>(2)?,
        "description": row.get::<_, String>(3)?,
        "standardDuration": row.get::<_, f64>(4)?,
        "createdAt": row.get::<_, Option<String>>(5)?,
        "updatedAt": row.get::<_, Option<String>>(6)?,
    }))
}

const LESSON_COLS: &str =
    "id, class_group_id, title, description, standard_duration, created_at, updated_at";

fn handle_lessons_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let rows = if let Some(class_group_id) = param_i64(&req.params, "classGroupId") {
        let sql = format!("SELECT {LESSON_COLS} FROM lessons WHERE class_group_id = ? ORDER BY id");
        conn.prepare(&sql).and_then(|mut stmt| {
            stmt.query_map([class_group_id], lesson_json)
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        })
    } else {
        let sql = format!("SELECT {LESSON_COLS} FROM lessons ORDER BY id");
        conn.prepare(&sql).and_then(|mut stmt| {
            stmt.query_map([], lesson_json)
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        })
    };

    match rows {
        Ok(lessons) => ok(&req.id, json!({ "lessons": list_result(&req.params, lessons) })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_lessons_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let title = match param_str(&req.params, "title") {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing title", None),
    };
    let description = param_str(&req.params, "description").unwrap_or("").to_string();
    let standard_duration = param_f64(&req.params, "standardDuration").unwrap_or(1.0);
    let class_group_id = param_i64(&req.params, "classGroupId");

    if let Some(group_id) = class_group_id {
        let exists: Option<i64> = match conn
            .query_row("SELECT 1 FROM class_groups WHERE id = ?", [group_id], |r| {
                r.get(0)
            })
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if exists.is_none() {
            return err(&req.id, "not_found", "class group not found", None);
        }
    }

    let now = db::now_iso();
    if let Err(e) = conn.execute(
        "INSERT INTO lessons(class_group_id, title, description, standard_duration,
                             created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &class_group_id,
            &title,
            &description,
            standard_duration,
            &now,
            &now,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "lessons" })),
        );
    }

    ok(
        &req.id,
        json!({ "lessonId": conn.last_insert_rowid(), "title": title }),
    )
}

fn handle_lessons_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(lesson_id) = param_i64(&req.params, "lessonId") else {
        return err(&req.id, "bad_params", "missing lessonId", None);
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM lessons WHERE id = ?", [lesson_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "lesson not found", None);
    }

    let mut sets: Vec<&str> = Vec::new();
    let mut args: Vec<rusqlite::types::Value> = Vec::new();
    if let Some(v) = param_str(&req.params, "title") {
        sets.push("title = ?");
        args.push(rusqlite::types::Value::Text(v.trim().to_string()));
    }
    if let Some(v) = param_str(&req.params, "description") {
        sets.push("description = ?");
        args.push(rusqlite::types::Value::Text(v.to_string()));
    }
    if let Some(v) = param_f64(&req.params, "standardDuration") {
        sets.push("standard_duration = ?");
        args.push(rusqlite::types::Value::Real(v));
    }
    if let Some(v) = param_i64(&req.params, "classGroupId") {
        sets.push("class_group_id = ?");
        args.push(rusqlite::types::Value::Integer(v));
    }
    if sets.is_empty() {
        return err(&req.id, "bad_params", "nothing to update", None);
    }

    sets.push("updated_at = ?");
    args.push(rusqlite::types::Value::Text(db::now_iso()));
    args.push(rusqlite::types::Value::Integer(lesson_id));

    let sql = format!("UPDATE lessons SET {} WHERE id = ?", sets.join(", "));
    if let Err(e) = conn.execute(&sql, rusqlite::params_from_iter(args)) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "lessons" })),
        );
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_lessons_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(lesson_id) = param_i64(&req.params, "lessonId") else {
        return err(&req.id, "bad_params", "missing lessonId", None);
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM lessons WHERE id = ?", [lesson_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "lesson not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Sessions keep their diary entry; they just lose the lesson link.
    if let Err(e) = tx.execute(
        "UPDATE class_sessions SET lesson_id = NULL WHERE lesson_id = ?",
        [lesson_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "class_sessions" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM lessons WHERE id = ?", [lesson_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "lessons" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "lessons.list" => Some(handle_lessons_list(state, req)),
        "lessons.create" => Some(handle_lessons_create(state, req)),
        "lessons.update" => Some(handle_lessons_update(state, req)),
        "lessons.delete" => Some(handle_lessons_delete(state, req)),
        _ => None,
    }
}
