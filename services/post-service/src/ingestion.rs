//! Post ingestion: fans one submission out to the blob store, the search
//! index and the record store.
//!
//! The steps run strictly in order and the first failure ends the request.
//! Nothing is rolled back:
//!
//! | failing step | blob | search document | record |
//! |--------------|------|-----------------|--------|
//! | blob         | -    | -               | -      |
//! | index        | kept | -               | -      |
//! | record       | kept | kept            | -      |
//!
//! The image URL is part of the indexed document, so the upload comes first;
//! the record store only holds the audit copy and may lag behind search.

use crate::blob_store::BlobStore;
use crate::error::PostError;
use crate::model::{Post, PostId, PostSubmission, Principal};
use crate::record_store::{Mutation, RecordStore};
use crate::search_index::SearchIndex;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, instrument};

/// Where a post's pieces are written
#[derive(Debug, Clone)]
pub struct IngestionTargets {
    /// Bucket receiving the image
    pub bucket: String,
    /// Search index receiving the document
    pub index: String,
    /// Record table receiving the structured row
    pub table: String,
}

pub struct PostIngestion {
    blob_store: Arc<dyn BlobStore>,
    search_index: Arc<dyn SearchIndex>,
    record_store: Arc<dyn RecordStore>,
    targets: IngestionTargets,
}

impl PostIngestion {
    pub fn new(
        blob_store: Arc<dyn BlobStore>,
        search_index: Arc<dyn SearchIndex>,
        record_store: Arc<dyn RecordStore>,
        targets: IngestionTargets,
    ) -> Self {
        Self {
            blob_store,
            search_index,
            record_store,
            targets,
        }
    }

    /// Ingest one post and return its id
    #[instrument(skip(self, principal, submission), fields(user = %principal.as_str()))]
    pub async fn ingest(
        &self,
        principal: &Principal,
        submission: PostSubmission,
    ) -> Result<PostId, PostError> {
        let PostSubmission {
            message,
            location,
            image,
        } = submission;

        let mut post = Post {
            user: principal.as_str().to_string(),
            message,
            location,
            url: None,
        };

        let id = PostId::new();
        let key = id.to_string();

        info!(post_id = %id, message = %post.message, "Received one post request");

        let image = image.ok_or_else(|| {
            metrics::counter!("posts.ingest.rejected", "reason" => "image_required").increment(1);
            PostError::ImageRequired
        })?;

        let url = self
            .blob_store
            .store(&self.targets.bucket, &key, &image)
            .await
            .map_err(|e| step_failed(&id, "blob", e))?;
        post.url = Some(url);

        self.search_index
            .index_document(&self.targets.index, &id, &post)
            .await
            .map_err(|e| step_failed(&id, "index", e))?;

        let mutation = Mutation::for_post(&post, Utc::now().timestamp_micros());
        self.record_store
            .append_record(&self.targets.table, &key, &mutation)
            .await
            .map_err(|e| step_failed(&id, "record", e))?;

        metrics::counter!("posts.ingest.completed").increment(1);
        info!(post_id = %id, "Post ingested");

        Ok(id)
    }
}

fn step_failed(id: &PostId, step: &'static str, err: PostError) -> PostError {
    error!(post_id = %id, step = step, error = %err, "Post ingestion halted");
    metrics::counter!("posts.ingest.failed", "step" => step).increment(1);
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::MockBlobStore;
    use crate::model::{ImageUpload, Location};
    use crate::record_store::MockRecordStore;
    use crate::search_index::MockSearchIndex;
    use crate::testing::{InMemoryBlobStore, InMemoryRecordStore, InMemorySearchIndex};
    use bytes::Bytes;
    use std::sync::atomic::Ordering;
    use tokio_test::{assert_err, assert_ok};

    fn targets() -> IngestionTargets {
        IngestionTargets {
            bucket: "post-images".to_string(),
            index: "around".to_string(),
            table: "post".to_string(),
        }
    }

    fn submission(with_image: bool) -> PostSubmission {
        PostSubmission {
            message: "hello".to_string(),
            location: Location { lat: 37.0, lon: -120.0 },
            image: with_image.then(|| ImageUpload {
                bytes: Bytes::from_static(b"jpeg-bytes"),
                content_type: Some("image/jpeg".to_string()),
                file_name: Some("photo.jpg".to_string()),
            }),
        }
    }

    fn john() -> Principal {
        Principal::new("john").unwrap()
    }

    struct Stores {
        blobs: Arc<InMemoryBlobStore>,
        index: Arc<InMemorySearchIndex>,
        records: Arc<InMemoryRecordStore>,
    }

    fn in_memory() -> (PostIngestion, Stores) {
        let stores = Stores {
            blobs: Arc::new(InMemoryBlobStore::default()),
            index: Arc::new(InMemorySearchIndex::default()),
            records: Arc::new(InMemoryRecordStore::default()),
        };
        let ingestion = PostIngestion::new(
            stores.blobs.clone(),
            stores.index.clone(),
            stores.records.clone(),
            targets(),
        );
        (ingestion, stores)
    }

    #[tokio::test]
    async fn test_ingest_writes_all_three_stores() {
        let (ingestion, stores) = in_memory();

        let id = assert_ok!(ingestion.ingest(&john(), submission(true)).await);
        let key = id.to_string();

        assert!(stores.blobs.contains("post-images", &key));

        let doc = stores.index.document("around", &id).unwrap();
        assert_eq!(doc.user, "john");
        assert_eq!(doc.message, "hello");
        assert_eq!(doc.location, Location { lat: 37.0, lon: -120.0 });
        assert_eq!(
            doc.url.as_deref(),
            Some(format!("https://blobs.test/post-images/{}", key).as_str())
        );

        let row = stores.records.row("post", &key).unwrap();
        assert_eq!(row.cells().len(), 4);
    }

    #[tokio::test]
    async fn test_missing_image_writes_nothing() {
        let (ingestion, stores) = in_memory();

        let err = assert_err!(ingestion.ingest(&john(), submission(false)).await);
        assert!(matches!(err, PostError::ImageRequired));
        assert_eq!(stores.blobs.object_count(), 0);
        assert_eq!(stores.index.document_count(), 0);
        assert_eq!(stores.records.row_count(), 0);
    }

    #[tokio::test]
    async fn test_blob_failure_skips_index_and_record() {
        let mut blob_store = MockBlobStore::new();
        blob_store
            .expect_store()
            .times(1)
            .returning(|_, _, _| Err(PostError::BlobUnavailable("no bucket".to_string())));

        let mut search_index = MockSearchIndex::new();
        search_index.expect_index_document().times(0);

        let mut record_store = MockRecordStore::new();
        record_store.expect_append_record().times(0);

        let ingestion = PostIngestion::new(
            Arc::new(blob_store),
            Arc::new(search_index),
            Arc::new(record_store),
            targets(),
        );

        let err = assert_err!(ingestion.ingest(&john(), submission(true)).await);
        assert!(matches!(err, PostError::BlobUnavailable(_)));
    }

    #[tokio::test]
    async fn test_index_failure_keeps_blob_and_skips_record() {
        let (ingestion, stores) = in_memory();
        stores.index.fail.store(true, Ordering::SeqCst);

        let err = assert_err!(ingestion.ingest(&john(), submission(true)).await);
        assert!(matches!(err, PostError::IndexUnavailable(_)));

        assert_eq!(stores.blobs.object_count(), 1);
        assert_eq!(stores.index.document_count(), 0);
        assert_eq!(stores.records.row_count(), 0);
    }

    #[tokio::test]
    async fn test_record_failure_keeps_blob_and_document() {
        let (ingestion, stores) = in_memory();
        stores.records.fail.store(true, Ordering::SeqCst);

        let err = assert_err!(ingestion.ingest(&john(), submission(true)).await);
        assert!(matches!(err, PostError::RecordStoreUnavailable(_)));

        assert_eq!(stores.blobs.object_count(), 1);
        assert_eq!(stores.index.document_count(), 1);
        assert_eq!(stores.records.row_count(), 0);
    }

    #[tokio::test]
    async fn test_same_id_joins_all_stores() {
        let mut blob_store = MockBlobStore::new();
        blob_store
            .expect_store()
            .withf(|bucket, _, _| bucket == "post-images")
            .returning(|_, key, _| Ok(format!("https://img/{}", key)));

        let mut search_index = MockSearchIndex::new();
        search_index
            .expect_index_document()
            .withf(|index, id, post| {
                index == "around"
                    && post.url.as_deref() == Some(format!("https://img/{}", id).as_str())
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut record_store = MockRecordStore::new();
        record_store
            .expect_append_record()
            .withf(|table, row_key, mutation| {
                table == "post" && !row_key.is_empty() && mutation.cells().len() == 4
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let ingestion = PostIngestion::new(
            Arc::new(blob_store),
            Arc::new(search_index),
            Arc::new(record_store),
            targets(),
        );

        let id = assert_ok!(ingestion.ingest(&john(), submission(true)).await);
        assert!(!id.to_string().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_ingestions_get_distinct_ids() {
        let (ingestion, stores) = in_memory();
        let user = john();

        let (first, second) = tokio::join!(
            ingestion.ingest(&user, submission(true)),
            ingestion.ingest(&user, submission(true)),
        );

        let (first, second) = (first.unwrap(), second.unwrap());
        assert_ne!(first, second);
        assert_eq!(stores.blobs.object_count(), 2);
        assert_eq!(stores.index.document_count(), 2);
        assert_eq!(stores.records.row_count(), 2);
    }
}
