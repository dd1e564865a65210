use anyhow::Result;
use async_trait::async_trait;
use log::debug;
use shared::{PaymentStatus, WeeklyDue};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};
use std::collections::BTreeSet;

use super::{format_timestamp, parse_status, parse_timestamp};
use crate::storage::change_feed::{ChangeKind, RowChange};
use crate::storage::connection::DbConnection;
use crate::storage::traits::WeeklyDueStorage;

const SELECT_COLUMNS: &str =
    "SELECT id, student_id, week_number, month, year, amount, status, paid_at FROM weekly_dues";

/// Repository for the `weekly_dues` table
#[derive(Clone)]
pub struct WeeklyDueRepository {
    db: DbConnection,
}

impl WeeklyDueRepository {
    pub fn new(db: DbConnection) -> Self {
        Self { db }
    }

    fn row_to_due(row: &SqliteRow) -> Result<WeeklyDue> {
        Ok(WeeklyDue {
            id: row.get("id"),
            student_id: row.get("student_id"),
            week_number: row.get::<i64, _>("week_number") as u8,
            month: row.get::<i64, _>("month") as u8,
            year: row.get::<i64, _>("year") as i32,
            amount: row.get("amount"),
            status: parse_status(&row.get::<String, _>("status"))?,
            paid_at: parse_timestamp(row.get("paid_at"))?,
        })
    }

    fn publish_for_students<'a>(&self, kind: ChangeKind, student_ids: impl Iterator<Item = &'a str>) {
        let unique: BTreeSet<&str> = student_ids.collect();
        for student_id in unique {
            self.db.feed().publish(RowChange::WeeklyDue {
                kind,
                student_id: student_id.to_string(),
            });
        }
    }
}

#[async_trait]
impl WeeklyDueStorage for WeeklyDueRepository {
    async fn list_dues_by_status(&self, student_id: &str, status: PaymentStatus) -> Result<Vec<WeeklyDue>> {
        let rows = sqlx::query(&format!(
            "{} WHERE student_id = ? AND status = ? ORDER BY year, month, week_number",
            SELECT_COLUMNS
        ))
        .bind(student_id)
        .bind(status.as_str())
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(Self::row_to_due).collect()
    }

    async fn list_dues_for_students(
        &self,
        student_ids: &[String],
        month: Option<u8>,
        year: Option<i32>,
    ) -> Result<Vec<WeeklyDue>> {
        if student_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(SELECT_COLUMNS);
        query.push(" WHERE student_id IN (");
        let mut ids = query.separated(", ");
        for id in student_ids {
            ids.push_bind(id.clone());
        }
        ids.push_unseparated(")");
        if let Some(month) = month {
            query.push(" AND month = ").push_bind(month as i64);
        }
        if let Some(year) = year {
            query.push(" AND year = ").push_bind(year as i64);
        }
        query.push(" ORDER BY week_number ASC");

        let rows = query.build().fetch_all(self.db.pool()).await?;
        rows.iter().map(Self::row_to_due).collect()
    }

    async fn list_all_dues(&self) -> Result<Vec<WeeklyDue>> {
        let rows = sqlx::query(&format!("{} ORDER BY student_id, year, month, week_number", SELECT_COLUMNS))
            .fetch_all(self.db.pool())
            .await?;

        rows.iter().map(Self::row_to_due).collect()
    }

    async fn upsert_dues(&self, dues: &[WeeklyDue]) -> Result<usize> {
        if dues.is_empty() {
            return Ok(0);
        }

        let mut tx = self.db.pool().begin().await?;
        for due in dues {
            sqlx::query(
                r#"
                INSERT INTO weekly_dues (id, student_id, week_number, month, year, amount, status, paid_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (student_id, month, week_number, year) DO UPDATE SET
                    amount = excluded.amount,
                    status = excluded.status,
                    paid_at = excluded.paid_at
                "#,
            )
            .bind(&due.id)
            .bind(&due.student_id)
            .bind(due.week_number as i64)
            .bind(due.month as i64)
            .bind(due.year as i64)
            .bind(due.amount)
            .bind(due.status.as_str())
            .bind(due.paid_at.map(format_timestamp))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!("Upserted {} weekly dues rows", dues.len());
        self.publish_for_students(ChangeKind::Update, dues.iter().map(|d| d.student_id.as_str()));
        Ok(dues.len())
    }

    async fn delete_month_dues(&self, student_id: &str, month: u8, year: i32) -> Result<u64> {
        let result = sqlx::query("DELETE FROM weekly_dues WHERE student_id = ? AND month = ? AND year = ?")
            .bind(student_id)
            .bind(month as i64)
            .bind(year as i64)
            .execute(self.db.pool())
            .await?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            self.publish_for_students(ChangeKind::Delete, std::iter::once(student_id));
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use shared::WEEKLY_DUE_AMOUNT;

    async fn setup_test() -> WeeklyDueRepository {
        let db = DbConnection::in_memory().await.expect("Failed to init test DB");
        WeeklyDueRepository::new(db)
    }

    fn due(student_id: &str, week: u8, month: u8, status: PaymentStatus) -> WeeklyDue {
        WeeklyDue {
            id: uuid::Uuid::new_v4().to_string(),
            student_id: student_id.to_string(),
            week_number: week,
            month,
            year: 2025,
            amount: WEEKLY_DUE_AMOUNT,
            status,
            paid_at: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_updates_existing_natural_key() {
        let repo = setup_test().await;
        let original = due("s1", 1, 3, PaymentStatus::Pending);
        repo.upsert_dues(&[original.clone()]).await.unwrap();

        // A fresh id with the same natural key must hit the same row
        let mut replacement = due("s1", 1, 3, PaymentStatus::Paid);
        replacement.paid_at = Some(Utc.with_ymd_and_hms(2025, 3, 4, 8, 0, 0).unwrap());
        repo.upsert_dues(&[replacement.clone()]).await.unwrap();

        let all = repo.list_all_dues().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, original.id);
        assert_eq!(all[0].status, PaymentStatus::Paid);
        assert_eq!(all[0].paid_at, replacement.paid_at);
    }

    #[tokio::test]
    async fn test_list_dues_by_status_filters_student_and_status() {
        let repo = setup_test().await;
        repo.upsert_dues(&[
            due("s1", 1, 3, PaymentStatus::Pending),
            due("s1", 2, 3, PaymentStatus::Paid),
            due("s1", 3, 3, PaymentStatus::Pending),
            due("s2", 1, 3, PaymentStatus::Pending),
        ])
        .await
        .unwrap();

        let pending = repo.list_dues_by_status("s1", PaymentStatus::Pending).await.unwrap();
        let weeks: Vec<u8> = pending.iter().map(|d| d.week_number).collect();
        assert_eq!(weeks, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_list_dues_for_students_with_month_filter() {
        let repo = setup_test().await;
        repo.upsert_dues(&[
            due("s1", 1, 3, PaymentStatus::Paid),
            due("s1", 1, 4, PaymentStatus::Paid),
            due("s2", 2, 3, PaymentStatus::Unpaid),
            due("s3", 1, 3, PaymentStatus::Unpaid),
        ])
        .await
        .unwrap();

        let ids = vec!["s1".to_string(), "s2".to_string()];
        let march = repo.list_dues_for_students(&ids, Some(3), Some(2025)).await.unwrap();
        assert_eq!(march.len(), 2);
        assert!(march.iter().all(|d| d.month == 3 && d.student_id != "s3"));

        let everything = repo.list_dues_for_students(&ids, None, None).await.unwrap();
        assert_eq!(everything.len(), 3);
        assert!(repo.list_dues_for_students(&[], None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_month_dues() {
        let repo = setup_test().await;
        repo.upsert_dues(&[
            due("s1", 1, 3, PaymentStatus::Paid),
            due("s1", 2, 3, PaymentStatus::Paid),
            due("s1", 1, 4, PaymentStatus::Paid),
        ])
        .await
        .unwrap();

        assert_eq!(repo.delete_month_dues("s1", 3, 2025).await.unwrap(), 2);
        assert_eq!(repo.list_all_dues().await.unwrap().len(), 1);
        assert_eq!(repo.delete_month_dues("s1", 3, 2025).await.unwrap(), 0);
    }
}
