use rusqlite::{Connection, OptionalExtension};

use crate::auth;
use crate::db;

const ADMIN_EMAIL: &str = "admin@coderoom.com";
const ADMIN_NAME: &str = "Administrador Geral";
const ADMIN_PASSWORD: &str = "admin123";

/// Make sure the built-in teacher account exists so a fresh workspace
/// is immediately sign-in-able. Existing accounts are left alone except
/// for backfilling a missing password hash.
pub fn ensure_admin_user(conn: &Connection) -> anyhow::Result<()> {
    let existing: Option<(i64, Option<String>)> = conn
        .query_row(
            "SELECT id, password_hash FROM users WHERE email = ?",
            [ADMIN_EMAIL],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;

    let now = db::now_iso();
    match existing {
        None => {
            conn.execute(
                "INSERT INTO users(name, email, role, password_hash, created_at, updated_at)
                 VALUES(?, ?, 'teacher', ?, ?, ?)",
                (
                    ADMIN_NAME,
                    ADMIN_EMAIL,
                    auth::hash_password(ADMIN_PASSWORD),
                    &now,
                    &now,
                ),
            )?;
        }
        Some((id, hash)) if hash.is_none() => {
            conn.execute(
                "UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?",
                (auth::hash_password(ADMIN_PASSWORD), &now, id),
            )?;
        }
        Some(_) => {}
    }
    Ok(())
}
