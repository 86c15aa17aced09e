use crate::error::PostError;
use crate::model::{Post, SearchQuery};
use crate::search_index::SearchIndex;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument};

/// Geo-radius search over indexed posts
pub struct GeoSearch {
    search_index: Arc<dyn SearchIndex>,
    index: String,
}

impl GeoSearch {
    pub fn new(search_index: Arc<dyn SearchIndex>, index: impl Into<String>) -> Self {
        Self {
            search_index,
            index: index.into(),
        }
    }

    /// Posts within the query circle, in the order the index returned them
    #[instrument(skip(self), fields(index = %self.index))]
    pub async fn search(&self, query: SearchQuery) -> Result<Vec<Post>, PostError> {
        info!(
            lat = query.center.lat,
            lon = query.center.lon,
            distance = %query.radius.as_distance(),
            "Search received"
        );

        let started = Instant::now();

        let posts = self
            .search_index
            .search(&self.index, &query)
            .await
            .map_err(|e| {
                error!(error = %e, "Search failed");
                metrics::counter!("posts.search.failed").increment(1);
                e
            })?;

        metrics::histogram!("posts.search.duration_seconds").record(started.elapsed().as_secs_f64());
        metrics::counter!("posts.search.completed").increment(1);

        info!(hits = posts.len(), "Found posts");

        Ok(posts)
    }
}
