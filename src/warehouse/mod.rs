//! Warehouse access: schema lookups, schema-driven coercion and queries.

pub mod bigquery;
pub mod schema;

use async_trait::async_trait;

use crate::error::Result;
use crate::logging::{PipelineStage, messages};
use crate::table::Table;

#[cfg(test)]
use mockall::automock;

pub use bigquery::BigQuery;
pub use schema::{SchemaField, parse_timestamp, reconcile_with_schema};

/// An authenticated warehouse project.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Ordered fields of `table_id` (`dataset.table` or `project.dataset.table`).
    async fn table_schema(&self, table_id: &str) -> Result<Vec<SchemaField>>;
    async fn run_query(&self, sql: &str) -> Result<Table>;
}

/// Fetch the schema of `table_id` and coerce `table` to it.
pub async fn sync_table_to_schema<W: Warehouse + ?Sized>(
    warehouse: &W,
    table: &mut Table,
    table_id: &str,
    cast_ids_as_string: bool,
) -> Result<()> {
    tracing::info!(stage = %PipelineStage::Transform, table_id, "{}", messages::TABLE_CONVERT_TYPES);
    let schema = warehouse.table_schema(table_id).await?;
    reconcile_with_schema(table, &schema, cast_ids_as_string)?;
    tracing::info!(
        stage = %PipelineStage::Transform,
        fields = schema.len(),
        "{}",
        messages::ETL_DATA_TRANSFORMED
    );
    Ok(())
}

/// Run `sql` and return its rows, or `None` if anything went wrong.
///
/// Errors are logged rather than returned.
pub async fn fetch_query<W: Warehouse + ?Sized>(warehouse: &W, sql: &str) -> Option<Table> {
    match warehouse.run_query(sql).await {
        Ok(table) => {
            tracing::info!(
                stage = %PipelineStage::Extract,
                rows = table.height(),
                columns = table.width(),
                "{}",
                messages::DB_QUERY_EXECUTED
            );
            Some(table)
        }
        Err(e) => {
            tracing::error!(stage = %PipelineStage::Extract, error = %e, "{}", messages::DB_QUERY);
            None
        }
    }
}
