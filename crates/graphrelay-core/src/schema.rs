use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use graphrelay_common::config::SchemaCacheConfig;
use moka::future::Cache;
use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};

/// Properties of one node or edge type that the backend indexes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSchema {
    pub name: String,
    pub queryable: BTreeSet<String>,
}

impl TypeSchema {
    pub fn is_queryable(&self, property: &str) -> bool {
        self.queryable.contains(property)
    }
}

/// Which properties of which types a table can serve natively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSchema {
    pub node_types: BTreeMap<String, TypeSchema>,
    pub edge_types: BTreeMap<String, TypeSchema>,
}

impl GraphSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node_type<I, S>(mut self, name: &str, queryable: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.node_types.insert(name.to_string(), type_schema(name, queryable));
        self
    }

    pub fn with_edge_type<I, S>(mut self, name: &str, queryable: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.edge_types.insert(name.to_string(), type_schema(name, queryable));
        self
    }

    pub fn node_type(&self, name: &str) -> Option<&TypeSchema> {
        self.node_types.get(name)
    }

    pub fn edge_type(&self, name: &str) -> Option<&TypeSchema> {
        self.edge_types.get(name)
    }
}

fn type_schema<I, S>(name: &str, queryable: I) -> TypeSchema
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    TypeSchema {
        name: name.to_string(),
        queryable: queryable.into_iter().map(Into::into).collect(),
    }
}

/// Loads the schema of a table, usually from the store's own metadata.
#[async_trait]
pub trait SchemaSource: Send + Sync {
    async fn load_schema(&self, table: &str) -> Result<GraphSchema>;
}

/// Per-table schema cache. Concurrent first requests for one table share a single load.
#[derive(Clone)]
pub struct SchemaCache {
    source: Arc<dyn SchemaSource>,
    cache: Cache<String, Arc<GraphSchema>>,
}

impl SchemaCache {
    pub fn new(source: Arc<dyn SchemaSource>, config: &SchemaCacheConfig) -> Self {
        let cache = Cache::builder()
            .time_to_live(Duration::from_secs(config.ttl_secs))
            .max_capacity(config.max_entries)
            .build();
        Self { source, cache }
    }

    pub async fn get(&self, table: &str) -> Result<Arc<GraphSchema>> {
        let source = self.source.clone();
        let name = table.to_string();
        self.cache
            .try_get_with(table.to_string(), async move {
                tracing::debug!("Loading schema for table '{}'", name);
                source.load_schema(&name).await.map(Arc::new)
            })
            .await
            .map_err(|e| GraphError::Schema(format!("table '{}': {}", table, e)))
    }

    pub async fn invalidate(&self, table: &str) {
        self.cache.invalidate(table).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        loads: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl SchemaSource for CountingSource {
        async fn load_schema(&self, table: &str) -> Result<GraphSchema> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail {
                return Err(GraphError::operation(format!("no table {}", table)));
            }
            Ok(GraphSchema::new().with_node_type("Person", ["name"]))
        }
    }

    #[tokio::test]
    async fn test_concurrent_first_loads_are_single_flight() {
        let source = Arc::new(CountingSource {
            loads: AtomicUsize::new(0),
            fail: false,
        });
        let cache = SchemaCache::new(source.clone(), &SchemaCacheConfig::default());

        let lookups = (0..8).map(|_| cache.get("graph"));
        let schemas = futures::future::try_join_all(lookups).await.unwrap();

        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
        assert!(schemas.iter().all(|s| s.node_type("Person").unwrap().is_queryable("name")));
    }

    #[tokio::test]
    async fn test_failed_load_is_schema_error_and_not_cached() {
        let source = Arc::new(CountingSource {
            loads: AtomicUsize::new(0),
            fail: true,
        });
        let cache = SchemaCache::new(source.clone(), &SchemaCacheConfig::default());

        assert!(matches!(cache.get("graph").await, Err(GraphError::Schema(_))));
        assert!(cache.get("graph").await.is_err());
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
    }
}
