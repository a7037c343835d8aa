use anyhow::Result;

use crate::models::{GroupRow, UserRow};
use crate::{Database, OptionalExt};

impl Database {
    /// Create a group and its membership rows in one transaction. The
    /// caller is responsible for including the creator in `member_ids`;
    /// duplicates are ignored.
    pub fn create_group(
        &self,
        id: &str,
        name: &str,
        created_by: &str,
        member_ids: &[String],
        now_ms: i64,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO groups (id, name, created_by, last_message_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id, name, created_by, now_ms],
            )?;

            for member in member_ids {
                tx.execute(
                    "INSERT OR IGNORE INTO group_members (group_id, user_id) VALUES (?1, ?2)",
                    rusqlite::params![id, member],
                )?;
            }

            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_group(&self, id: &str) -> Result<Option<GroupRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, created_by, last_message_id, last_message_at
                 FROM groups WHERE id = ?1",
                [id],
                row_to_group,
            )
            .optional()
        })
    }

    pub fn list_groups_for(&self, user_id: &str) -> Result<Vec<GroupRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT g.id, g.name, g.created_by, g.last_message_id, g.last_message_at
                 FROM groups g
                 JOIN group_members m ON m.group_id = g.id
                 WHERE m.user_id = ?1",
            )?;
            let rows = stmt
                .query_map([user_id], row_to_group)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn is_group_member(&self, group_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                [group_id, user_id],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    pub fn group_member_count(&self, group_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM group_members WHERE group_id = ?1",
                [group_id],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }

    /// Hydrated member profiles, sorted by name.
    pub fn get_group_members(&self, group_id: &str) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.external_id, u.name, u.email, u.avatar_url,
                        u.is_online, u.last_seen, u.created_at
                 FROM group_members m
                 JOIN users u ON u.id = m.user_id
                 WHERE m.group_id = ?1
                 ORDER BY u.name",
            )?;
            let rows = stmt
                .query_map([group_id], |row| {
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
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn row_to_group(row: &rusqlite::Row<'_>) -> std::result::Result<GroupRow, rusqlite::Error> {
    Ok(GroupRow {
        id: row.get(0)?,
        name: row.get(1)?,
        created_by: row.get(2)?,
        last_message_id: row.get(3)?,
        last_message_at: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use crate::test_util::{seed_user, test_db};

    #[test]
    fn test_create_group_with_members() {
        let db = test_db();
        let ada = seed_user(&db, "ada");
        let bob = seed_user(&db, "bob");
        let eve = seed_user(&db, "eve");

        let gid = Uuid::new_v4().to_string();
        // creator listed twice — membership must dedup
        let members = vec![ada.clone(), bob.clone(), eve.clone(), ada.clone()];
        db.create_group(&gid, "planning", &ada, &members, 100).unwrap();

        assert_eq!(db.group_member_count(&gid).unwrap(), 3);
        assert!(db.is_group_member(&gid, &ada).unwrap());
        assert!(db.is_group_member(&gid, &bob).unwrap());

        let group = db.get_group(&gid).unwrap().unwrap();
        assert_eq!(group.name, "planning");
        assert_eq!(group.created_by, ada);
    }

    #[test]
    fn test_list_groups_only_for_members() {
        let db = test_db();
        let ada = seed_user(&db, "ada");
        let bob = seed_user(&db, "bob");
        let eve = seed_user(&db, "eve");

        let gid = Uuid::new_v4().to_string();
        db.create_group(&gid, "duo", &ada, &[ada.clone(), bob.clone()], 100).unwrap();

        assert_eq!(db.list_groups_for(&ada).unwrap().len(), 1);
        assert_eq!(db.list_groups_for(&bob).unwrap().len(), 1);
        assert!(db.list_groups_for(&eve).unwrap().is_empty());
        assert!(!db.is_group_member(&gid, &eve).unwrap());
    }
}
