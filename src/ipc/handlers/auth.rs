use crate::auth;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::param_str;
use crate::ipc::types::{AppState, Principal, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

struct Account {
    id: i64,
    name: String,
    email: String,
    role: String,
    password_hash: Option<String>,
}

fn find_user(conn: &Connection, email: &str) -> rusqlite::Result<Option<Account>> {
    conn.query_row(
        "SELECT id, name, email, role, password_hash FROM users WHERE email = ?",
        [email],
        |r| {
            Ok(Account {
                id: r.get(0)?,
                name: r.get(1)?,
                email: r.get(2)?,
                role: r.get(3)?,
                password_hash: r.get(4)?,
            })
        },
    )
    .optional()
}

// Students sign in with the same form; they live in their own table
// and always carry the student role.
fn find_student(conn: &Connection, email: &str) -> rusqlite::Result<Option<Account>> {
    conn.query_row(
        "SELECT id, name, email, password_hash FROM students WHERE email = ?",
        [email],
        |r| {
            Ok(Account {
                id: r.get(0)?,
                name: r.get(1)?,
                email: r.get(2)?,
                role: "student".to_string(),
                password_hash: r.get(3)?,
            })
        },
    )
    .optional()
}

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(email) = param_str(&req.params, "email") else {
        return err(&req.id, "bad_params", "missing email", None);
    };
    let Some(password) = param_str(&req.params, "password") else {
        return err(&req.id, "bad_params", "missing password", None);
    };

    let account = match find_user(conn, email) {
        Ok(Some(a)) => Some(a),
        Ok(None) => match find_student(conn, email) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        },
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Same error for unknown account, missing hash and wrong password;
    // callers cannot probe which emails exist.
    let Some(account) = account else {
        return err(&req.id, "invalid_credentials", "invalid email or password", None);
    };
    let verified = account
        .password_hash
        .as_deref()
        .map(|stored| auth::verify_password(password, stored))
        .unwrap_or(false);
    if !verified {
        return err(&req.id, "invalid_credentials", "invalid email or password", None);
    }

    let token = auth::new_session_token();
    state.sessions.insert(
        token.clone(),
        Principal {
            user_id: account.id,
            role: account.role.clone(),
        },
    );

    ok(
        &req.id,
        json!({
            "accessToken": token,
            "user": {
                "id": account.id,
                "name": account.name,
                "email": account.email,
                "role": account.role,
            }
        }),
    )
}

fn handle_me(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(token) = param_str(&req.params, "token") else {
        return err(&req.id, "bad_params", "missing token", None);
    };
    let Some(principal) = state.sessions.get(token).cloned() else {
        return err(&req.id, "invalid_token", "unknown or expired token", None);
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let row = if principal.role == "student" {
        conn.query_row(
            "SELECT id, name, email FROM students WHERE id = ?",
            [principal.user_id],
            |r| {
                Ok(json!({
                    "id": r.get::<_, i64>(0)?,
                    "name": r.get::<_, String>(1)?,
                    "email": r.get::<_, String>(2)?,
                    "role": "student",
                }))
            },
        )
        .optional()
    } else {
        conn.query_row(
            "SELECT id, name, email, role FROM users WHERE id = ?",
            [principal.user_id],
            |r| {
                Ok(json!({
                    "id": r.get::<_, i64>(0)?,
                    "name": r.get::<_, String>(1)?,
                    "email": r.get::<_, String>(2)?,
                    "role": r.get::<_, String>(3)?,
                }))
            },
        )
        .optional()
    };

    match row {
        Ok(Some(user)) => ok(&req.id, json!({ "user": user })),
        Ok(None) => err(&req.id, "invalid_token", "session user no longer exists", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(token) = param_str(&req.params, "token") else {
        return err(&req.id, "bad_params", "missing token", None);
    };
    // Idempotent; logging out twice is not an error.
    state.sessions.remove(token);
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.login" => Some(handle_login(state, req)),
        "auth.me" => Some(handle_me(state, req)),
        "auth.logout" => Some(handle_logout(state, req)),
        _ => None,
    }
}
