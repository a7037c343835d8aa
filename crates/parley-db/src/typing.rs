use anyhow::Result;

use crate::Database;
use crate::models::UserRow;

impl Database {
    /// Upsert the single typing row for this (chat, user) pair. Rows are
    /// never deleted; readers apply a freshness window instead.
    pub fn set_typing(
        &self,
        chat_kind: &str,
        chat_id: &str,
        user_id: &str,
        is_typing: bool,
        now_ms: i64,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO typing_status (chat_kind, chat_id, user_id, is_typing, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(chat_kind, chat_id, user_id)
                 DO UPDATE SET is_typing = excluded.is_typing, updated_at = excluded.updated_at",
                rusqlite::params![chat_kind, chat_id, user_id, is_typing, now_ms],
            )?;
            Ok(())
        })
    }

    /// Users currently typing in a chat: flag set, not the excluded caller,
    /// and asserted strictly after `newer_than_ms`. The caller computes the
    /// cutoff from its staleness window, which keeps this query pure and
    /// testable with fixed clocks.
    pub fn typing_users(
        &self,
        chat_kind: &str,
        chat_id: &str,
        exclude_user: &str,
        newer_than_ms: i64,
    ) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.external_id, u.name, u.email, u.avatar_url,
                        u.is_online, u.last_seen, u.created_at
                 FROM typing_status t
                 JOIN users u ON u.id = t.user_id
                 WHERE t.chat_kind = ?1 AND t.chat_id = ?2
                   AND t.user_id != ?3
                   AND t.is_typing = 1
                   AND t.updated_at > ?4
                 ORDER BY u.name",
            )?;
            let rows = stmt
                .query_map(
                    rusqlite::params![chat_kind, chat_id, exclude_user, newer_than_ms],
                    |row| {
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
                    },
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::test_util::{seed_user, test_db};

    const STALE_AFTER_MS: i64 = 3_000;

    #[test]
    fn test_typing_goes_stale_without_explicit_clear() {
        let db = test_db();
        let ada = seed_user(&db, "ada");
        let bob = seed_user(&db, "bob");
        let (conv, _) = db.get_or_create_conversation(&ada, &bob, 0).unwrap();

        // ada starts typing at t=0
        db.set_typing("dm", &conv, &ada, true, 0).unwrap();

        // bob queries at t=2999: still fresh
        let typers = db.typing_users("dm", &conv, &bob, 2_999 - STALE_AFTER_MS).unwrap();
        assert_eq!(typers.len(), 1);
        assert_eq!(typers[0].id, ada);

        // at t=3001 the row is stale, with no clear call ever issued
        let typers = db.typing_users("dm", &conv, &bob, 3_001 - STALE_AFTER_MS).unwrap();
        assert!(typers.is_empty());

        // exactly at the threshold counts as stale
        let typers = db.typing_users("dm", &conv, &bob, 3_000 - STALE_AFTER_MS).unwrap();
        assert!(typers.is_empty());
    }

    #[test]
    fn test_typing_excludes_requester_and_cleared_flags() {
        let db = test_db();
        let ada = seed_user(&db, "ada");
        let bob = seed_user(&db, "bob");
        let (conv, _) = db.get_or_create_conversation(&ada, &bob, 0).unwrap();

        db.set_typing("dm", &conv, &ada, true, 100).unwrap();
        db.set_typing("dm", &conv, &bob, true, 100).unwrap();

        // ada does not see herself
        let typers = db.typing_users("dm", &conv, &ada, 100 - STALE_AFTER_MS).unwrap();
        assert_eq!(typers.len(), 1);
        assert_eq!(typers[0].id, bob);

        // explicit clear wins even inside the freshness window
        db.set_typing("dm", &conv, &bob, false, 200).unwrap();
        let typers = db.typing_users("dm", &conv, &ada, 200 - STALE_AFTER_MS).unwrap();
        assert!(typers.is_empty());
    }

    #[test]
    fn test_reassertion_refreshes_single_row() {
        let db = test_db();
        let ada = seed_user(&db, "ada");
        let bob = seed_user(&db, "bob");
        let (conv, _) = db.get_or_create_conversation(&ada, &bob, 0).unwrap();

        // re-sent while keys are pressed; still one row per (chat, user)
        db.set_typing("dm", &conv, &ada, true, 0).unwrap();
        db.set_typing("dm", &conv, &ada, true, 2_000).unwrap();
        db.set_typing("dm", &conv, &ada, true, 4_000).unwrap();

        let typers = db.typing_users("dm", &conv, &bob, 5_000 - STALE_AFTER_MS).unwrap();
        assert_eq!(typers.len(), 1);
    }
}
