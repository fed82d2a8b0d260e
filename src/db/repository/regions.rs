//! Region rows are written once at startup and read into the in-memory
//! registry; nothing mutates them afterwards.

use sqlx::PgPool;

use super::RepoError;
use crate::db::models::Region;

pub async fn list_all_regions(pool: &PgPool) -> Result<Vec<Region>, RepoError> {
    const QUERY: &str = r#"
        SELECT id, name, display_name
        FROM regions
        ORDER BY id
    "#;

    let regions = sqlx::query_as::<_, Region>(QUERY).fetch_all(pool).await?;
    Ok(regions)
}

/// Seeds a region if its name is not present yet. Existing rows keep their
/// IDs, so re-deploys do not re-key samples.
pub async fn insert_region_if_absent(pool: &PgPool, region: &Region) -> Result<(), RepoError> {
    const QUERY: &str = r#"
        INSERT INTO regions (id, name, display_name)
        VALUES ($1, $2, $3)
        ON CONFLICT (name) DO NOTHING
    "#;

    sqlx::query(QUERY)
        .bind(region.id)
        .bind(&region.name)
        .bind(&region.display_name)
        .execute(pool)
        .await?;

    Ok(())
}
