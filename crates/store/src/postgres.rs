//! PostGIS-backed geo index.
//!
//! Expected schema:
//! - `organizations(id text primary key, active boolean)`
//! - `shops(id text primary key, org_id text, active boolean, location geography(Point, 4326))`
//! - `likes(user_id text, org_id text, primary key (user_id, org_id))`

use crate::geo::GeoIndex;
use async_trait::async_trait;
use perk_core::discovery::{NearbyCandidate, NearbyQuery, RankBy};
use perk_core::{PerkError, PerkResult};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};

const NEARBY_SELECT: &str = "\
SELECT s.id AS shop_id,
       s.org_id AS org_id,
       ST_Distance(s.location, ST_SetSRID(ST_MakePoint($2, $1), 4326)::geography) AS distance,
       EXISTS (SELECT 1 FROM likes l WHERE l.org_id = s.org_id AND l.user_id = $4) AS liked,
       (SELECT COUNT(*) FROM likes l WHERE l.org_id = s.org_id) AS like_count
FROM shops s
JOIN organizations o ON o.id = s.org_id
WHERE s.active AND o.active
  AND ST_DWithin(s.location, ST_SetSRID(ST_MakePoint($2, $1), 4326)::geography, $3)";

fn nearby_sql(rank_by: RankBy) -> String {
    let order = match rank_by {
        RankBy::Distance => "distance ASC",
        RankBy::Popularity => "like_count DESC, distance ASC",
    };
    format!("{NEARBY_SELECT}\nORDER BY {order}\nLIMIT $5 OFFSET $6")
}

fn storage(context: &str, err: sqlx::Error) -> PerkError {
    PerkError::Storage(format!("{context}: {err}"))
}

pub struct PostgresGeoIndex {
    pool: PgPool,
}

impl PostgresGeoIndex {
    pub async fn connect(database_url: &str, max_connections: u32) -> PerkResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| storage("connect to geo database", e))?;
        info!(max_connections = max_connections, "Connected to PostGIS geo index");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn candidate(row: &PgRow) -> Result<NearbyCandidate, sqlx::Error> {
    let like_count: i64 = row.try_get("like_count")?;
    Ok(NearbyCandidate {
        shop_id: row.try_get("shop_id")?,
        org_id: row.try_get("org_id")?,
        distance_meters: row.try_get("distance")?,
        liked: row.try_get("liked")?,
        like_count: like_count.max(0) as u64,
    })
}

#[async_trait]
impl GeoIndex for PostgresGeoIndex {
    async fn nearby(&self, query: &NearbyQuery) -> PerkResult<Vec<NearbyCandidate>> {
        let sql = nearby_sql(query.rank_by);
        let rows = sqlx::query(&sql)
            .bind(query.latitude)
            .bind(query.longitude)
            .bind(query.radius_meters)
            .bind(query.user_id.as_str())
            .bind(i64::from(query.limit))
            .bind(query.offset() as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| storage("nearby query", e))?;

        let candidates = rows
            .iter()
            .map(candidate)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| storage("decode nearby row", e))?;

        debug!(count = candidates.len(), rank_by = ?query.rank_by, "Nearby candidates fetched");
        Ok(candidates)
    }

    async fn set_org_active(&self, org_id: &str, active: bool) -> PerkResult<()> {
        sqlx::query("UPDATE organizations SET active = $2 WHERE id = $1")
            .bind(org_id)
            .bind(active)
            .execute(&self.pool)
            .await
            .map_err(|e| storage("mirror organization active flag", e))?;
        Ok(())
    }
}
