//! In-memory gateways for tests.

use crate::blob_store::BlobStore;
use crate::error::PostError;
use crate::model::{ImageUpload, Location, Post, PostId, SearchQuery};
use crate::record_store::{Mutation, RecordStore};
use crate::search_index::{IndexMapping, SearchIndex};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

const EARTH_RADIUS_KM: f64 = 6371.0;

fn haversine_km(a: &Location, b: &Location) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

#[derive(Default)]
pub struct InMemoryBlobStore {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    pub fail: AtomicBool,
}

impl InMemoryBlobStore {
    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.objects
            .lock()
            .unwrap()
            .contains_key(&(bucket.to_string(), key.to_string()))
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn store(
        &self,
        bucket: &str,
        key: &str,
        image: &ImageUpload,
    ) -> Result<String, PostError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PostError::BlobUnavailable("bucket offline".to_string()));
        }
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), image.bytes.to_vec());
        Ok(format!("https://blobs.test/{}/{}", bucket, key))
    }
}

#[derive(Default)]
pub struct InMemorySearchIndex {
    indices: Mutex<HashMap<String, Vec<(PostId, Post)>>>,
    pub fail: AtomicBool,
}

impl InMemorySearchIndex {
    pub fn document(&self, index: &str, id: &PostId) -> Option<Post> {
        self.indices
            .lock()
            .unwrap()
            .get(index)
            .and_then(|docs| docs.iter().find(|(doc_id, _)| doc_id == id))
            .map(|(_, post)| post.clone())
    }

    pub fn document_count(&self) -> usize {
        self.indices.lock().unwrap().values().map(Vec::len).sum()
    }
}

#[async_trait]
impl SearchIndex for InMemorySearchIndex {
    async fn ensure_index(&self, index: &str, _mapping: &IndexMapping) -> Result<(), PostError> {
        self.indices
            .lock()
            .unwrap()
            .entry(index.to_string())
            .or_default();
        Ok(())
    }

    async fn index_document(
        &self,
        index: &str,
        id: &PostId,
        post: &Post,
    ) -> Result<(), PostError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PostError::IndexUnavailable("connection refused".to_string()));
        }
        let mut indices = self.indices.lock().unwrap();
        let docs = indices.entry(index.to_string()).or_default();
        docs.retain(|(doc_id, _)| doc_id != id);
        docs.push((*id, post.clone()));
        Ok(())
    }

    async fn search(&self, index: &str, query: &SearchQuery) -> Result<Vec<Post>, PostError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PostError::IndexUnavailable("connection refused".to_string()));
        }
        let indices = self.indices.lock().unwrap();
        Ok(indices
            .get(index)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, post)| {
                        haversine_km(&query.center, &post.location) <= query.radius.km() + 1e-6
                    })
                    .map(|(_, post)| post.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn ping(&self) -> Result<(), PostError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PostError::IndexUnavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryRecordStore {
    rows: Mutex<HashMap<(String, String), Mutation>>,
    pub fail: AtomicBool,
}

impl InMemoryRecordStore {
    pub fn row(&self, table: &str, row_key: &str) -> Option<Mutation> {
        self.rows
            .lock()
            .unwrap()
            .get(&(table.to_string(), row_key.to_string()))
            .cloned()
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn append_record(
        &self,
        table: &str,
        row_key: &str,
        mutation: &Mutation,
    ) -> Result<(), PostError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PostError::RecordStoreUnavailable("pool timed out".to_string()));
        }
        self.rows
            .lock()
            .unwrap()
            .insert((table.to_string(), row_key.to_string()), mutation.clone());
        Ok(())
    }

    async fn ping(&self) -> Result<(), PostError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PostError::RecordStoreUnavailable("pool timed out".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine() {
        let sf = Location { lat: 37.7749, lon: -122.4194 };
        let la = Location { lat: 34.0522, lon: -118.2437 };
        let distance = haversine_km(&sf, &la);
        assert!((distance - 559.0).abs() < 5.0, "distance was {}", distance);
        assert_eq!(haversine_km(&sf, &sf), 0.0);
    }
}
