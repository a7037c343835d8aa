use anyhow::Result;
use uuid::Uuid;

use crate::models::UserRow;
use crate::{Database, OptionalExt};

impl Database {
    /// Create or update a user record keyed by the identity provider's id.
    /// Updates only touch profile fields; presence is owned by
    /// `set_presence`. Returns the internal user id.
    pub fn upsert_user(
        &self,
        external_id: &str,
        name: &str,
        email: &str,
        avatar_url: &str,
        now_ms: i64,
    ) -> Result<String> {
        self.with_conn_mut(|conn| {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT id FROM users WHERE external_id = ?1",
                    [external_id],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(id) = existing {
                conn.execute(
                    "UPDATE users SET name = ?1, email = ?2, avatar_url = ?3 WHERE id = ?4",
                    rusqlite::params![name, email, avatar_url, id],
                )?;
                return Ok(id);
            }

            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO users (id, external_id, name, email, avatar_url, is_online, last_seen)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
                rusqlite::params![id, external_id, name, email, avatar_url, now_ms],
            )?;
            Ok(id)
        })
    }

    pub fn get_user_by_external_id(&self, external_id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("{USER_SELECT} WHERE external_id = ?1"),
                [external_id],
                row_to_user,
            )
            .optional()
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            conn.query_row(&format!("{USER_SELECT} WHERE id = ?1"), [id], row_to_user)
                .optional()
        })
    }

    /// All users except the given one, sorted by name.
    pub fn list_users_except(&self, user_id: &str) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("{USER_SELECT} WHERE id != ?1 ORDER BY name"))?;
            let rows = stmt
                .query_map([user_id], row_to_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Case-insensitive substring search on display name, excluding the
    /// caller. `instr` sidesteps LIKE wildcard escaping.
    pub fn search_users(&self, user_id: &str, query: &str) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{USER_SELECT} WHERE id != ?1 AND instr(lower(name), lower(?2)) > 0 ORDER BY name"
            ))?;
            let rows = stmt
                .query_map(rusqlite::params![user_id, query], row_to_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn set_presence(&self, user_id: &str, is_online: bool, now_ms: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET is_online = ?1, last_seen = ?2 WHERE id = ?3",
                rusqlite::params![is_online, now_ms, user_id],
            )?;
            Ok(())
        })
    }

    /// Batch-fetch users by id, for enriching message and member lists.
    pub fn get_users_by_ids(&self, ids: &[String]) -> Result<Vec<UserRow>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!("{USER_SELECT} WHERE id IN ({})", placeholders.join(", "));

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> =
                ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();

            let rows = stmt
                .query_map(params.as_slice(), row_to_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

const USER_SELECT: &str =
    "SELECT id, external_id, name, email, avatar_url, is_online, last_seen, created_at FROM users";

fn row_to_user(row: &rusqlite::Row<'_>) -> std::result::Result<UserRow, rusqlite::Error> {
    Ok(UserRow {
        id: row.get(0)?,
        external_id: row.get(1)?,
        name: row.get(2)?,
        email: row.get(3)?,
        avatar_url: row.get(4)?,
        is_online: row.get(5)?,
        last_seen: row.get(6)?,
        created_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::test_util::{seed_user, test_db};

    #[test]
    fn test_upsert_creates_then_updates() {
        let db = test_db();

        let id = db.upsert_user("ext_1", "Ada", "ada@example.com", "http://a/1.png", 10).unwrap();
        let again = db.upsert_user("ext_1", "Ada L.", "ada@example.com", "http://a/2.png", 20).unwrap();
        assert_eq!(id, again);

        let user = db.get_user_by_external_id("ext_1").unwrap().unwrap();
        assert_eq!(user.name, "Ada L.");
        assert_eq!(user.avatar_url, "http://a/2.png");
        // update path does not touch presence
        assert!(!user.is_online);
        assert_eq!(user.last_seen, 10);
    }

    #[test]
    fn test_presence_flag() {
        let db = test_db();
        let id = seed_user(&db, "ada");

        db.set_presence(&id, true, 5_000).unwrap();
        let user = db.get_user_by_id(&id).unwrap().unwrap();
        assert!(user.is_online);
        assert_eq!(user.last_seen, 5_000);

        db.set_presence(&id, false, 6_000).unwrap();
        let user = db.get_user_by_id(&id).unwrap().unwrap();
        assert!(!user.is_online);
    }

    #[test]
    fn test_search_excludes_self_and_ignores_case() {
        let db = test_db();
        let ada = seed_user(&db, "Ada");
        let _adam = seed_user(&db, "Adam");
        let _bob = seed_user(&db, "Bob");

        let hits = db.search_users(&ada, "AD").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "Adam");

        let all = db.list_users_except(&ada).unwrap();
        assert_eq!(all.len(), 2);
    }
}
