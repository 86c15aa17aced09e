//! Around Post Service
//!
//! Backend for location-tagged posts. Authenticated users submit a short
//! message, a coordinate and an image; anyone holding a valid token can then
//! find posts within a radius of a point.
//!
//! ## Features
//!
//! - **Post Ingestion**: the image goes to S3 with a public-read ACL, the post
//!   (with the image URL) is indexed in Elasticsearch, and a wide-row audit
//!   record is appended to PostgreSQL
//! - **Geo Search**: `geo_distance` queries against the `location` geo_point
//!   field, hits decoded into typed posts
//! - **Bearer Authentication**: HS256 JWTs carrying a `username` claim
//!
//! ## Architecture
//!
//! ```text
//!  POST /post (multipart)                 GET /search?lat&lon&range
//!        │                                          │
//!        ▼                                          ▼
//! ┌──────────────┐                          ┌──────────────┐
//! │ Post         │                          │ Geo          │
//! │ Ingestion    │                          │ Search       │
//! └──────────────┘                          └──────────────┘
//!   │1      │2        │3                           │
//!   ▼       ▼         ▼                            │
//! ┌─────┐ ┌───────────────┐ ┌──────────────┐       │
//! │ S3  │ │ Elasticsearch │ │ PostgreSQL   │       │
//! │     │ │ index         │◀┼──────────────┼───────┘
//! └─────┘ └───────────────┘ │ record_cells │
//!                           └──────────────┘
//! ```

pub mod api;
pub mod auth;
pub mod blob_store;
pub mod config;
pub mod error;
pub mod geo_search;
pub mod ingestion;
pub mod model;
pub mod record_store;
pub mod search_index;

#[cfg(test)]
mod testing;

pub use api::{create_router, start_api_server, AppState};
pub use auth::{AuthenticatedUser, JwtVerifier};
pub use blob_store::{BlobStore, S3BlobStore};
pub use config::Config;
pub use error::{ErrorResponse, PostError};
pub use geo_search::GeoSearch;
pub use ingestion::{IngestionTargets, PostIngestion};
pub use model::{
    CoordinateParsing, ImageUpload, Location, Post, PostId, PostSubmission, Principal, Radius,
    SearchQuery,
};
pub use record_store::{Mutation, PgRecordStore, RecordStore};
pub use search_index::{ElasticsearchIndex, IndexMapping, SearchIndex};
