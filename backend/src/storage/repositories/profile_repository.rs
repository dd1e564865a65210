use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use shared::{PaymentProfile, PaymentStatus, StudentProfile};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{format_timestamp, parse_status, parse_timestamp};
use crate::storage::change_feed::{ChangeKind, RowChange};
use crate::storage::connection::DbConnection;
use crate::storage::traits::ProfileStorage;

/// Repository for the `profiles` table
#[derive(Clone)]
pub struct ProfileRepository {
    db: DbConnection,
}

impl ProfileRepository {
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }

    fn row_to_student(row: &SqliteRow) -> StudentProfile {
        StudentProfile {
            id: row.get("id"),
            full_name: row.get("full_name"),
            nim: row.get("nim"),
            class_id: row.get("class_id"),
        }
    }

    async fn publish_current(&self, id: &str, kind: ChangeKind) -> Result<()> {
        if let Some(record) = self.get_payment_profile(id).await? {
            self.db.feed().publish(RowChange::Profile { kind, record });
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileStorage for ProfileRepository {
    async fn store_profile(&self, profile: &StudentProfile) -> Result<()> {
        let existing = sqlx::query("SELECT 1 FROM profiles WHERE id = ?")
            .bind(&profile.id)
            .fetch_optional(self.db.pool())
            .await?;

        sqlx::query(
            r#"
            INSERT INTO profiles (id, full_name, nim, class_id)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                full_name = excluded.full_name,
                nim = excluded.nim,
                class_id = excluded.class_id
            "#,
        )
        .bind(&profile.id)
        .bind(&profile.full_name)
        .bind(&profile.nim)
        .bind(&profile.class_id)
        .execute(self.db.pool())
        .await?;

        let kind = if existing.is_some() { ChangeKind::Update } else { ChangeKind::Insert };
        self.publish_current(&profile.id, kind).await
    }

    async fn get_payment_profile(&self, id: &str) -> Result<Option<PaymentProfile>> {
        let row = sqlx::query(
            r#"
            SELECT id, payment_status, payment_expires_at
            FROM profiles
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await?;

        match row {
            Some(r) => Ok(Some(PaymentProfile {
                id: r.get("id"),
                payment_status: parse_status(&r.get::<String, _>("payment_status"))?,
                payment_expires_at: parse_timestamp(r.get("payment_expires_at"))?,
            })),
            None => Ok(None),
        }
    }

    async fn update_payment_status(
        &self,
        id: &str,
        status: PaymentStatus,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE profiles
            SET payment_status = ?, payment_expires_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(expires_at.map(format_timestamp))
        .bind(id)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            debug!("No profile {} to update", id);
            return Ok(false);
        }

        self.publish_current(id, ChangeKind::Update).await?;
        Ok(true)
    }

    async fn list_class_students(&self, class_id: &str) -> Result<Vec<StudentProfile>> {
        let rows = sqlx::query(
            r#"
            SELECT id, full_name, nim, class_id
            FROM profiles
            WHERE class_id = ?
            ORDER BY full_name ASC
            "#,
        )
        .bind(class_id)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.iter().map(Self::row_to_student).collect())
    }

    async fn list_students(&self) -> Result<Vec<StudentProfile>> {
        let rows = sqlx::query(
            r#"
            SELECT id, full_name, nim, class_id
            FROM profiles
            ORDER BY full_name ASC
            "#,
        )
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.iter().map(Self::row_to_student).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use crate::storage::ProfileChange;

    async fn setup_test() -> ProfileRepository {
        let db = DbConnection::in_memory().await.expect("Failed to init test DB");
        ProfileRepository::new(db)
    }

    fn student(id: &str, name: &str, class_id: &str) -> StudentProfile {
        StudentProfile {
            id: id.to_string(),
            full_name: name.to_string(),
            nim: format!("15126{}", id),
            class_id: Some(class_id.to_string()),
        }
    }

    #[tokio::test]
    async fn test_new_profile_starts_unpaid() {
        let repo = setup_test().await;
        repo.store_profile(&student("s1", "Budi", "A")).await.unwrap();

        let profile = repo.get_payment_profile("s1").await.unwrap().unwrap();
        assert_eq!(profile.payment_status, PaymentStatus::Unpaid);
        assert_eq!(profile.payment_expires_at, None);
    }

    #[tokio::test]
    async fn test_update_payment_status_round_trip_and_publish() {
        let repo = setup_test().await;
        repo.store_profile(&student("s1", "Budi", "A")).await.unwrap();
        let mut subscription = repo.db.feed().subscribe_profile("s1");

        let expires = Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap();
        let updated = repo
            .update_payment_status("s1", PaymentStatus::Pending, Some(expires))
            .await
            .unwrap();
        assert!(updated);

        let stored = repo.get_payment_profile("s1").await.unwrap().unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Pending);
        assert_eq!(stored.payment_expires_at, Some(expires));

        let pushed = subscription.next().await.unwrap();
        assert_eq!(pushed, ProfileChange::Updated(stored));
    }

    #[tokio::test]
    async fn test_update_unknown_profile_reports_false() {
        let repo = setup_test().await;
        let updated = repo
            .update_payment_status("ghost", PaymentStatus::Unpaid, None)
            .await
            .unwrap();
        assert!(!updated);
    }

    #[tokio::test]
    async fn test_store_profile_keeps_payment_state() {
        let repo = setup_test().await;
        repo.store_profile(&student("s1", "Budi", "A")).await.unwrap();
        repo.update_payment_status("s1", PaymentStatus::Paid, None).await.unwrap();

        repo.store_profile(&student("s1", "Budi Santoso", "B")).await.unwrap();

        let profile = repo.get_payment_profile("s1").await.unwrap().unwrap();
        assert_eq!(profile.payment_status, PaymentStatus::Paid);
        let students = repo.list_class_students("B").await.unwrap();
        assert_eq!(students[0].full_name, "Budi Santoso");
    }

    #[tokio::test]
    async fn test_list_class_students_is_ordered_by_name() {
        let repo = setup_test().await;
        repo.store_profile(&student("s1", "Citra", "A")).await.unwrap();
        repo.store_profile(&student("s2", "Adi", "A")).await.unwrap();
        repo.store_profile(&student("s3", "Bayu", "B")).await.unwrap();

        let names: Vec<String> = repo
            .list_class_students("A")
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.full_name)
            .collect();
        assert_eq!(names, vec!["Adi", "Citra"]);
        assert_eq!(repo.list_students().await.unwrap().len(), 3);
    }
}
