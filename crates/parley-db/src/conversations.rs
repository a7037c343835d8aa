use anyhow::{Result, bail};
use uuid::Uuid;

use crate::models::ConversationRow;
use crate::{Database, OptionalExt};

impl Database {
    /// Return the existing two-party conversation for this pair or create
    /// one. The pair is canonicalized (sorted) before lookup, so argument
    /// order never matters; the UNIQUE(user_a, user_b) constraint backs the
    /// at-most-one invariant. Returns (conversation id, created).
    pub fn get_or_create_conversation(
        &self,
        user_id: &str,
        other_user_id: &str,
        now_ms: i64,
    ) -> Result<(String, bool)> {
        if user_id == other_user_id {
            bail!("cannot open a conversation with yourself");
        }

        let (a, b) = if user_id < other_user_id {
            (user_id, other_user_id)
        } else {
            (other_user_id, user_id)
        };

        self.with_conn_mut(|conn| {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT id FROM conversations WHERE user_a = ?1 AND user_b = ?2",
                    [a, b],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(id) = existing {
                return Ok((id, false));
            }

            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO conversations (id, user_a, user_b, last_message_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id, a, b, now_ms],
            )?;
            Ok((id, true))
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, user_a, user_b, last_message_id, last_message_at
                 FROM conversations WHERE id = ?1",
                [id],
                row_to_conversation,
            )
            .optional()
        })
    }

    pub fn list_conversations_for(&self, user_id: &str) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_a, user_b, last_message_id, last_message_at
                 FROM conversations WHERE user_a = ?1 OR user_b = ?1",
            )?;
            let rows = stmt
                .query_map([user_id], row_to_conversation)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn row_to_conversation(
    row: &rusqlite::Row<'_>,
) -> std::result::Result<ConversationRow, rusqlite::Error> {
    Ok(ConversationRow {
        id: row.get(0)?,
        user_a: row.get(1)?,
        user_b: row.get(2)?,
        last_message_id: row.get(3)?,
        last_message_at: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::test_util::{seed_user, test_db};

    #[test]
    fn test_get_or_create_is_idempotent_across_order() {
        let db = test_db();
        let ada = seed_user(&db, "ada");
        let bob = seed_user(&db, "bob");

        let (first, created) = db.get_or_create_conversation(&ada, &bob, 100).unwrap();
        assert!(created);

        let (second, created) = db.get_or_create_conversation(&bob, &ada, 200).unwrap();
        assert!(!created);
        assert_eq!(first, second);

        let (third, created) = db.get_or_create_conversation(&ada, &bob, 300).unwrap();
        assert!(!created);
        assert_eq!(first, third);
    }

    #[test]
    fn test_distinct_pairs_get_distinct_conversations() {
        let db = test_db();
        let ada = seed_user(&db, "ada");
        let bob = seed_user(&db, "bob");
        let eve = seed_user(&db, "eve");

        let (ab, _) = db.get_or_create_conversation(&ada, &bob, 100).unwrap();
        let (ae, _) = db.get_or_create_conversation(&ada, &eve, 100).unwrap();
        assert_ne!(ab, ae);

        assert_eq!(db.list_conversations_for(&ada).unwrap().len(), 2);
        assert_eq!(db.list_conversations_for(&bob).unwrap().len(), 1);
    }

    #[test]
    fn test_self_conversation_rejected() {
        let db = test_db();
        let ada = seed_user(&db, "ada");
        assert!(db.get_or_create_conversation(&ada, &ada, 100).is_err());
    }
}
