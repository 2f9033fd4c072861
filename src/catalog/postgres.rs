use std::collections::BTreeMap;
use std::future::Future;

use anyhow::{anyhow, Context, Result};
use image_palette::PaletteColor;
use pgvector::Vector;
use tokio::runtime::{Builder, Runtime};
use tokio_postgres::types::Json;
use tokio_postgres::{Client, NoTls, Row};
use uuid::Uuid;

use super::{rank_hits, CatalogSchema, CatalogStore};
use crate::model::{
    EmbeddingCounts, EmbeddingRecord, ImageFilter, ImageRecord, PendingImage, ScoredImage,
    SubcategoryCount,
};

/// Extra nearest-neighbour candidates fetched so equal distances can be
/// ordered by id after the index scan.
const TIE_MARGIN: usize = 8;

/// Postgres + pgvector catalog driven from blocking code.
///
/// Owns a private single-worker tokio runtime that keeps the connection task
/// alive; every query is submitted with `block_on`.
pub struct PgCatalog {
    runtime: Option<Runtime>,
    client: Client,
    schema: CatalogSchema,
}

impl PgCatalog {
    /// Connects to `database_url` using the given table layout.
    pub fn connect(database_url: &str, schema: CatalogSchema) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("moodboard-pg")
            .enable_all()
            .build()
            .context("failed to start tokio runtime")?;
        let client = runtime.block_on(async {
            let (client, connection) = tokio_postgres::connect(database_url, NoTls)
                .await
                .with_context(|| format!("failed to connect to Postgres at {}", database_url))?;
            tokio::spawn(async move {
                if let Err(err) = connection.await {
                    tracing::error!("postgres connection error: {err}");
                }
            });
            Ok::<_, anyhow::Error>(client)
        })?;
        Ok(Self {
            runtime: Some(runtime),
            client,
            schema,
        })
    }

    /// Creates the vector extension, both tables and their indexes when
    /// missing. `dims` fixes the embedding column width.
    pub fn prepare(&self, dims: usize) -> Result<()> {
        anyhow::ensure!(dims > 0, "embedding dimension must be positive");
        let images = self.schema.images.qualified();
        let embeddings = self.schema.embeddings.qualified();
        let statements = [
            "CREATE EXTENSION IF NOT EXISTS vector".to_string(),
            format!(
                "CREATE TABLE IF NOT EXISTS {images} (
                    id UUID PRIMARY KEY,
                    original_id TEXT NOT NULL,
                    source TEXT NOT NULL,
                    source_url TEXT NOT NULL,
                    download_url TEXT NOT NULL,
                    width INTEGER NOT NULL,
                    height INTEGER NOT NULL,
                    aspect_ratio DOUBLE PRECISION NOT NULL,
                    image_hash TEXT NOT NULL UNIQUE,
                    colors JSONB NOT NULL,
                    urls JSONB NOT NULL,
                    attribution JSONB NOT NULL,
                    domain TEXT NOT NULL,
                    subcategory TEXT NOT NULL,
                    tags JSONB NOT NULL,
                    date_imported TIMESTAMPTZ NOT NULL,
                    UNIQUE (source, original_id)
                )"
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {images} (domain, subcategory)",
                self.schema.images.index_name("domain_subcategory_idx")
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {embeddings} (
                    image_id UUID PRIMARY KEY REFERENCES {images} (id) ON DELETE CASCADE,
                    model TEXT NOT NULL,
                    embedding VECTOR({dims}) NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
                )"
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {embeddings} (model)",
                self.schema.embeddings.index_name("model_idx")
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {embeddings} USING hnsw (embedding vector_cosine_ops)",
                self.schema.embeddings.index_name("embedding_hnsw_idx")
            ),
        ];
        for sql in &statements {
            self.block_on(self.client.execute(sql.as_str(), &[]))
                .with_context(|| format!("failed to prepare catalog schema: {sql}"))?;
        }
        Ok(())
    }

    fn block_on<T, F>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T, tokio_postgres::Error>>,
    {
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| anyhow!("catalog runtime is shut down"))?;
        Ok(runtime.block_on(future)?)
    }

    fn count(&self, sql: &str, params: &[&(dyn tokio_postgres::types::ToSql + Sync)]) -> Result<u64> {
        let row = self
            .block_on(self.client.query_one(sql, params))
            .with_context(|| format!("count query failed: {sql}"))?;
        let count: i64 = row.try_get(0)?;
        Ok(count.max(0) as u64)
    }
}

impl Drop for PgCatalog {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl CatalogStore for PgCatalog {
    fn source_exists(&self, source: &str, original_id: &str) -> Result<bool> {
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE source = $1 AND original_id = $2)",
            self.schema.images.qualified()
        );
        let row = self
            .block_on(self.client.query_one(&sql, &[&source, &original_id]))
            .context("source lookup failed")?;
        Ok(row.try_get(0)?)
    }

    fn hash_exists(&self, hash: &str) -> Result<bool> {
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE image_hash = $1)",
            self.schema.images.qualified()
        );
        let row = self
            .block_on(self.client.query_one(&sql, &[&hash]))
            .context("hash lookup failed")?;
        Ok(row.try_get(0)?)
    }

    fn insert_image(&self, record: &ImageRecord) -> Result<bool> {
        let sql = format!(
            "INSERT INTO {} \
                (id, original_id, source, source_url, download_url, width, height, aspect_ratio, \
                 image_hash, colors, urls, attribution, domain, subcategory, tags, date_imported) \
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
                ON CONFLICT DO NOTHING",
            self.schema.images.qualified()
        );
        let width = i32::try_from(record.dimensions.width)
            .map_err(|_| anyhow!("width {} exceeds i32 range", record.dimensions.width))?;
        let height = i32::try_from(record.dimensions.height)
            .map_err(|_| anyhow!("height {} exceeds i32 range", record.dimensions.height))?;
        let colors = Json(&record.colors);
        let urls = Json(&record.urls);
        let attribution = Json(&record.attribution);
        let tags = Json(&record.tags);
        let inserted = self
            .block_on(self.client.execute(
                &sql,
                &[
                    &record.id,
                    &record.original_id,
                    &record.source,
                    &record.source_url,
                    &record.download_url,
                    &width,
                    &height,
                    &record.dimensions.aspect_ratio,
                    &record.hash,
                    &colors,
                    &urls,
                    &attribution,
                    &record.domain,
                    &record.subcategory,
                    &tags,
                    &record.date_imported,
                ],
            ))
            .with_context(|| format!("failed to insert image {}", record.original_id))?;
        Ok(inserted == 1)
    }

    fn subcategory_counts(&self) -> Result<Vec<SubcategoryCount>> {
        let sql = format!(
            "SELECT domain, subcategory, COUNT(*) FROM {} GROUP BY domain, subcategory ORDER BY domain, subcategory",
            self.schema.images.qualified()
        );
        let rows = self
            .block_on(self.client.query(&sql, &[]))
            .context("subcategory count query failed")?;
        rows.iter()
            .map(|row| {
                let count: i64 = row.try_get(2)?;
                Ok(SubcategoryCount {
                    domain: row.try_get(0)?,
                    subcategory: row.try_get(1)?,
                    count: count.max(0) as u64,
                })
            })
            .collect()
    }

    fn total_images(&self) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.schema.images.qualified());
        self.count(&sql, &[])
    }

    fn images_missing_embeddings(&self, limit: usize) -> Result<Vec<PendingImage>> {
        let sql = format!(
            "SELECT i.id, i.urls FROM {} i \
                LEFT JOIN {} e ON e.image_id = i.id \
                WHERE e.image_id IS NULL \
                ORDER BY i.date_imported, i.id \
                LIMIT $1",
            self.schema.images.qualified(),
            self.schema.embeddings.qualified()
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self
            .block_on(self.client.query(&sql, &[&limit]))
            .context("pending embedding query failed")?;
        rows.iter()
            .map(|row| {
                let Json(urls): Json<BTreeMap<String, String>> = row.try_get(1)?;
                Ok(PendingImage {
                    id: row.try_get(0)?,
                    urls,
                })
            })
            .collect()
    }

    fn insert_embedding(&self, record: &EmbeddingRecord) -> Result<bool> {
        let sql = format!(
            "INSERT INTO {} (image_id, model, embedding, created_at) VALUES ($1, $2, $3, $4) \
                ON CONFLICT (image_id) DO NOTHING",
            self.schema.embeddings.qualified()
        );
        let vector = Vector::from(record.vector.clone());
        let inserted = self
            .block_on(self.client.execute(
                &sql,
                &[&record.image_id, &record.model, &vector, &record.created_at],
            ))
            .with_context(|| format!("failed to insert embedding for {}", record.image_id))?;
        Ok(inserted == 1)
    }

    fn embedding_counts(&self, model: &str) -> Result<EmbeddingCounts> {
        let sql = format!(
            "SELECT \
                (SELECT COUNT(*) FROM {images}), \
                (SELECT COUNT(*) FROM {embeddings} WHERE model = $1), \
                (SELECT COUNT(*) FROM {embeddings} WHERE model <> $1)",
            images = self.schema.images.qualified(),
            embeddings = self.schema.embeddings.qualified()
        );
        let row = self
            .block_on(self.client.query_one(&sql, &[&model]))
            .context("embedding coverage query failed")?;
        let total: i64 = row.try_get(0)?;
        let current: i64 = row.try_get(1)?;
        let other: i64 = row.try_get(2)?;
        Ok(EmbeddingCounts {
            total_images: total.max(0) as u64,
            current_model: current.max(0) as u64,
            other_models: other.max(0) as u64,
        })
    }

    fn delete_stale_embeddings(&self, model: &str) -> Result<u64> {
        let sql = format!(
            "DELETE FROM {} WHERE model <> $1",
            self.schema.embeddings.qualified()
        );
        self.block_on(self.client.execute(&sql, &[&model]))
            .context("failed to delete stale embeddings")
    }

    fn nearest(
        &self,
        query: &[f32],
        model: &str,
        filter: &ImageFilter,
        limit: usize,
    ) -> Result<Vec<ScoredImage>> {
        let sql = format!(
            "SELECT i.id, i.domain, i.subcategory, i.urls, i.colors, i.tags, \
                    1 - (e.embedding <=> $1) AS similarity \
                FROM {} e \
                JOIN {} i ON i.id = e.image_id \
                WHERE e.model = $2 \
                  AND ($3::TEXT IS NULL OR i.domain = $3) \
                  AND ($4::TEXT IS NULL OR i.subcategory = $4) \
                ORDER BY e.embedding <=> $1 \
                LIMIT $5",
            self.schema.embeddings.qualified(),
            self.schema.images.qualified()
        );
        let vector = Vector::from(query.to_vec());
        let domain = filter.domain.as_deref();
        let subcategory = filter.subcategory.as_deref();
        // A single sort key keeps the hnsw index usable; ties are settled
        // over a slightly wider candidate set.
        let fetch = i64::try_from(limit.saturating_add(TIE_MARGIN)).unwrap_or(i64::MAX);
        let rows = self
            .block_on(
                self.client
                    .query(&sql, &[&vector, &model, &domain, &subcategory, &fetch]),
            )
            .context("similarity query failed")?;
        let mut hits = rows
            .iter()
            .map(scored_from_row)
            .collect::<Result<Vec<_>>>()?;
        rank_hits(&mut hits, limit);
        Ok(hits)
    }
}

fn scored_from_row(row: &Row) -> Result<ScoredImage> {
    let Json(urls): Json<BTreeMap<String, String>> = row.try_get(3)?;
    let Json(colors): Json<Vec<PaletteColor>> = row.try_get(4)?;
    let Json(tags): Json<Vec<String>> = row.try_get(5)?;
    Ok(ScoredImage {
        id: row.try_get::<_, Uuid>(0)?,
        domain: row.try_get(1)?,
        subcategory: row.try_get(2)?,
        urls,
        colors,
        tags,
        similarity: row.try_get(6)?,
    })
}
