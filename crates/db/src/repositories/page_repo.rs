//! Repository for page membership (`pages`, `page_vms`).

use sqlx::PgPool;
use vmwatch_core::types::DbId;

/// Resolves dashboard pages to their member VMs.
pub struct PageRepo;

impl PageRepo {
    /// Insert a page, returning its id.
    pub async fn create(pool: &PgPool, name: &str) -> Result<DbId, sqlx::Error> {
        let (id,): (DbId,) = sqlx::query_as("INSERT INTO pages (name) VALUES ($1) RETURNING id")
            .bind(name)
            .fetch_one(pool)
            .await?;
        Ok(id)
    }

    /// Add a VM to a page at the given position. Re-adding moves it.
    pub async fn add_vm(
        pool: &PgPool,
        page_id: DbId,
        vm_id: DbId,
        position: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO page_vms (page_id, vm_id, position) VALUES ($1, $2, $3)
             ON CONFLICT (page_id, vm_id) DO UPDATE SET position = EXCLUDED.position",
        )
        .bind(page_id)
        .bind(vm_id)
        .bind(position)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Member VM ids of a page in display order.
    ///
    /// A missing page yields an empty list.
    pub async fn vm_ids(pool: &PgPool, page_id: DbId) -> Result<Vec<DbId>, sqlx::Error> {
        let rows: Vec<(DbId,)> = sqlx::query_as(
            "SELECT vm_id FROM page_vms WHERE page_id = $1 ORDER BY position, vm_id",
        )
        .bind(page_id)
        .fetch_all(pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
