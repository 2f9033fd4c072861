//! Table naming for the Postgres catalog.

use anyhow::Result;

/// Fully-qualified Postgres table name (schema + table).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    schema: String,
    table: String,
}

impl TableName {
    /// Builds a new table identifier.
    pub fn new<S, T>(schema: S, table: T) -> Result<Self>
    where
        S: Into<String>,
        T: Into<String>,
    {
        let schema = schema.into();
        let table = table.into();
        anyhow::ensure!(!schema.trim().is_empty(), "schema name is required");
        anyhow::ensure!(!table.trim().is_empty(), "table name is required");
        Ok(Self { schema, table })
    }

    /// Fully-qualified table reference with quoted identifiers.
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }

    /// Raw table string.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Deterministic, unquoted index name for `suffix`.
    pub fn index_name(&self, suffix: &str) -> String {
        format!(
            "{}_{}_{}",
            sanitize_ident(&self.schema),
            sanitize_ident(&self.table),
            suffix
        )
    }
}

/// The two tables the catalog owns.
#[derive(Debug, Clone)]
pub struct CatalogSchema {
    /// Image metadata.
    pub images: TableName,
    /// One model-tagged vector per image.
    pub embeddings: TableName,
}

impl CatalogSchema {
    /// `images` and `image_embeddings` inside `schema`.
    pub fn new(schema: &str) -> Result<Self> {
        Self::with_tables(schema, "images", "image_embeddings")
    }

    /// Custom table names inside `schema`.
    pub fn with_tables(schema: &str, images: &str, embeddings: &str) -> Result<Self> {
        Ok(Self {
            images: TableName::new(schema, images)?,
            embeddings: TableName::new(schema, embeddings)?,
        })
    }
}

/// Quotes Postgres identifiers, escaping embedded quotes.
pub fn quote_ident(input: &str) -> String {
    let escaped = input.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

fn sanitize_ident(input: &str) -> String {
    input
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
        .collect()
}
