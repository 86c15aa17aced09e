use crate::config::DatabaseConfig;
use crate::error::PostError;
use crate::model::Post;
use anyhow::Context;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, instrument};

/// Column family holding the post body
pub const POST_FAMILY: &str = "post";
/// Column family holding the coordinates
pub const LOCATION_FAMILY: &str = "location";

/// A single cell write
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub family: String,
    pub qualifier: String,
    pub value: Vec<u8>,
}

/// Set of cells applied to one row under a single version timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    /// Cell version in microseconds since the Unix epoch
    timestamp_micros: i64,
    cells: Vec<Cell>,
}

impl Mutation {
    pub fn new(timestamp_micros: i64) -> Self {
        Self {
            timestamp_micros,
            cells: Vec::new(),
        }
    }

    pub fn set(
        mut self,
        family: impl Into<String>,
        qualifier: impl Into<String>,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        self.cells.push(Cell {
            family: family.into(),
            qualifier: qualifier.into(),
            value: value.into(),
        });
        self
    }

    /// Structured record of a post: `post:user`, `post:message`,
    /// `location:lat`, `location:lon`, all text-encoded
    pub fn for_post(post: &Post, timestamp_micros: i64) -> Self {
        Self::new(timestamp_micros)
            .set(POST_FAMILY, "user", post.user.as_bytes())
            .set(POST_FAMILY, "message", post.message.as_bytes())
            .set(LOCATION_FAMILY, "lat", post.location.lat.to_string())
            .set(LOCATION_FAMILY, "lon", post.location.lon.to_string())
    }

    pub fn timestamp_micros(&self) -> i64 {
        self.timestamp_micros
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }
}

/// Gateway to the wide-row structured record store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Apply every cell of `mutation` to `row_key` in `table` as one write
    async fn append_record(
        &self,
        table: &str,
        row_key: &str,
        mutation: &Mutation,
    ) -> Result<(), PostError>;

    /// Connectivity check for readiness probes
    async fn ping(&self) -> Result<(), PostError>;
}

/// Wide-row record store on PostgreSQL
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    /// Create a new record store with connection pool
    pub async fn new(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to record store database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Declare the column families of `table`; existing families are kept
    pub async fn ensure_table(&self, table: &str, families: &[&str]) -> anyhow::Result<()> {
        for family in families {
            sqlx::query(
                r#"
                INSERT INTO record_column_families (table_name, family)
                VALUES ($1, $2)
                ON CONFLICT (table_name, family) DO NOTHING
                "#,
            )
            .bind(table)
            .bind(*family)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to declare column family {}:{}", table, family))?;
        }

        info!(table = %table, families = ?families, "Record table ready");
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    #[instrument(skip(self, mutation), fields(cells = mutation.cells().len()))]
    async fn append_record(
        &self,
        table: &str,
        row_key: &str,
        mutation: &Mutation,
    ) -> Result<(), PostError> {
        let unavailable = |e: sqlx::Error| PostError::RecordStoreUnavailable(e.to_string());

        let mut tx = self.pool.begin().await.map_err(unavailable)?;

        for cell in mutation.cells() {
            // Undeclared families violate the foreign key and fail the whole row
            sqlx::query(
                r#"
                INSERT INTO record_cells (
                    table_name, row_key, family, qualifier, version, value
                ) VALUES (
                    $1, $2, $3, $4, $5, $6
                )
                ON CONFLICT (table_name, row_key, family, qualifier, version)
                DO UPDATE SET value = EXCLUDED.value
                "#,
            )
            .bind(table)
            .bind(row_key)
            .bind(&cell.family)
            .bind(&cell.qualifier)
            .bind(mutation.timestamp_micros())
            .bind(&cell.value)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;
        }

        tx.commit().await.map_err(unavailable)?;

        debug!(table = %table, row_key = %row_key, "Record appended");

        Ok(())
    }

    async fn ping(&self) -> Result<(), PostError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| PostError::RecordStoreUnavailable(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Location;

    fn cell(family: &str, qualifier: &str, value: &str) -> Cell {
        Cell {
            family: family.to_string(),
            qualifier: qualifier.to_string(),
            value: value.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_mutation_for_post() {
        let post = Post {
            user: "john".to_string(),
            message: "hello".to_string(),
            location: Location { lat: 37.0, lon: -120.5 },
            url: Some("https://img/1".to_string()),
        };

        let mutation = Mutation::for_post(&post, 1_700_000_000_000_000);

        assert_eq!(mutation.timestamp_micros(), 1_700_000_000_000_000);
        assert_eq!(
            mutation.cells(),
            &[
                cell("post", "user", "john"),
                cell("post", "message", "hello"),
                cell("location", "lat", "37"),
                cell("location", "lon", "-120.5"),
            ]
        );
    }

    #[test]
    fn test_coordinates_use_shortest_text_form() {
        let post = Post {
            user: "u".to_string(),
            message: String::new(),
            location: Location { lat: 0.1, lon: 1e-7 },
            url: None,
        };

        let mutation = Mutation::for_post(&post, 0);
        assert_eq!(mutation.cells()[2].value, b"0.1".to_vec());
        assert_eq!(mutation.cells()[3].value, b"0.0000001".to_vec());
        // Empty messages are still written as a cell
        assert_eq!(mutation.cells()[1].value, Vec::<u8>::new());
    }
}
