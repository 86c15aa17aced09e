use crate::config::SearchConfig;
use crate::error::PostError;
use crate::model::{Post, PostId, SearchQuery};
use anyhow::Context;
use async_trait::async_trait;
use elasticsearch::{
    http::transport::{SingleNodeConnectionPool, TransportBuilder},
    indices::{IndicesCreateParts, IndicesExistsParts},
    params::Refresh,
    Elasticsearch, IndexParts, SearchParts,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, instrument};
use url::Url;

/// Field holding the post coordinates in index documents
pub const LOCATION_FIELD: &str = "location";

/// geo_distance rejects a zero distance, so a zero radius is sent as the
/// smallest distance geo_point storage can resolve
const COINCIDENT_DISTANCE: &str = "1cm";

/// Index creation body declaring the geo-point field
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMapping {
    body: Value,
}

impl IndexMapping {
    /// Mapping with a single `geo_point` field
    pub fn geo_point(field: &str) -> Self {
        let mut properties = serde_json::Map::new();
        properties.insert(field.to_string(), json!({ "type": "geo_point" }));

        Self {
            body: json!({
                "mappings": {
                    "properties": properties
                }
            }),
        }
    }

    /// Mapping used for post documents
    pub fn posts() -> Self {
        Self::geo_point(LOCATION_FIELD)
    }

    pub fn body(&self) -> &Value {
        &self.body
    }
}

/// Gateway to the geo-aware search index
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Create `index` with `mapping` unless it already exists
    async fn ensure_index(&self, index: &str, mapping: &IndexMapping) -> Result<(), PostError>;

    /// Write a post document, visible to searches once this returns
    async fn index_document(&self, index: &str, id: &PostId, post: &Post)
        -> Result<(), PostError>;

    /// All posts within the query circle, in the store's order
    async fn search(&self, index: &str, query: &SearchQuery) -> Result<Vec<Post>, PostError>;

    /// Connectivity check for readiness probes
    async fn ping(&self) -> Result<(), PostError>;
}

/// Elasticsearch-backed search index
#[derive(Clone)]
pub struct ElasticsearchIndex {
    client: Elasticsearch,
    doc_type: String,
    max_hits: i64,
}

impl ElasticsearchIndex {
    pub fn new(config: &SearchConfig) -> anyhow::Result<Self> {
        let url = Url::parse(&config.url).context("Invalid Elasticsearch URL")?;
        let pool = SingleNodeConnectionPool::new(url);
        let transport = TransportBuilder::new(pool)
            .build()
            .context("Failed to build Elasticsearch transport")?;

        info!(url = %config.url, index = %config.index, "Elasticsearch client initialized");

        Ok(Self {
            client: Elasticsearch::new(transport),
            doc_type: config.doc_type.clone(),
            max_hits: config.max_hits,
        })
    }
}

#[async_trait]
impl SearchIndex for ElasticsearchIndex {
    #[instrument(skip(self, mapping))]
    async fn ensure_index(&self, index: &str, mapping: &IndexMapping) -> Result<(), PostError> {
        let provisioning = |message: String| PostError::IndexProvisioning {
            index: index.to_string(),
            message,
        };

        let exists_response = self
            .client
            .indices()
            .exists(IndicesExistsParts::Index(&[index]))
            .send()
            .await
            .map_err(|e| provisioning(format!("existence check failed: {}", e)))?;

        let status = exists_response.status_code();
        if status.is_success() {
            debug!(index = %index, "Index already exists");
            return Ok(());
        }
        if status.as_u16() != 404 {
            return Err(provisioning(format!(
                "unexpected status {} from existence check",
                status
            )));
        }

        let create_response = self
            .client
            .indices()
            .create(IndicesCreateParts::Index(index))
            .body(mapping.body().clone())
            .send()
            .await
            .map_err(|e| provisioning(format!("create failed: {}", e)))?;

        let status = create_response.status_code();
        if status.is_success() {
            info!(index = %index, "Created search index");
            return Ok(());
        }

        // Another instance may have created it between the check and the create
        let body: Value = create_response.json().await.unwrap_or(Value::Null);
        if is_already_exists(&body) {
            debug!(index = %index, "Index created concurrently");
            return Ok(());
        }

        Err(provisioning(format!("create returned {}: {}", status, body)))
    }

    #[instrument(skip(self, post), fields(doc_type = %self.doc_type))]
    async fn index_document(
        &self,
        index: &str,
        id: &PostId,
        post: &Post,
    ) -> Result<(), PostError> {
        let id = id.to_string();

        self.client
            .index(IndexParts::IndexId(index, &id))
            .body(post)
            .refresh(Refresh::True)
            .send()
            .await
            .and_then(|response| response.error_for_status_code())
            .map_err(|e| PostError::IndexUnavailable(format!("failed to index {}: {}", id, e)))?;

        info!(index = %index, post_id = %id, "Post is saved to search index");

        Ok(())
    }

    #[instrument(skip(self))]
    async fn search(&self, index: &str, query: &SearchQuery) -> Result<Vec<Post>, PostError> {
        let response = self
            .client
            .search(SearchParts::Index(&[index]))
            .body(geo_distance_query(query))
            .size(self.max_hits)
            .send()
            .await
            .and_then(|response| response.error_for_status_code())
            .map_err(|e| PostError::IndexUnavailable(format!("search failed: {}", e)))?;

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| PostError::IndexUnavailable(format!("undecodable search response: {}", e)))?;

        info!(
            took_ms = body.took,
            total_hits = body.hits.total.as_ref().map(|t| t.value).unwrap_or_default(),
            "Search completed"
        );

        Ok(body.into_posts())
    }

    async fn ping(&self) -> Result<(), PostError> {
        self.client
            .ping()
            .send()
            .await
            .and_then(|response| response.error_for_status_code())
            .map_err(|e| PostError::IndexUnavailable(e.to_string()))?;
        Ok(())
    }
}

/// Circle filter on the location field
fn geo_distance_query(query: &SearchQuery) -> Value {
    let distance = if query.radius.km() == 0.0 {
        COINCIDENT_DISTANCE.to_string()
    } else {
        query.radius.as_distance()
    };

    let mut geo_distance = serde_json::Map::new();
    geo_distance.insert("distance".to_string(), Value::String(distance));
    geo_distance.insert(
        LOCATION_FIELD.to_string(),
        json!({ "lat": query.center.lat, "lon": query.center.lon }),
    );

    json!({
        "query": {
            "bool": {
                "filter": { "geo_distance": geo_distance }
            }
        }
    })
}

fn is_already_exists(body: &Value) -> bool {
    body.pointer("/error/type")
        .and_then(Value::as_str)
        .map(|t| t == "resource_already_exists_exception")
        .unwrap_or(false)
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    took: u64,
    hits: HitsEnvelope,
}

#[derive(Debug, Deserialize)]
struct HitsEnvelope {
    total: Option<TotalHits>,
    #[serde(default)]
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct TotalHits {
    value: u64,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_source")]
    source: Post,
}

impl SearchResponse {
    fn into_posts(self) -> Vec<Post> {
        self.hits
            .hits
            .into_iter()
            .map(|hit| {
                debug!(
                    post_id = %hit.id,
                    user = %hit.source.user,
                    lat = hit.source.location.lat,
                    lon = hit.source.location.lon,
                    "Search hit"
                );
                hit.source
            })
            .collect()
    }
}
