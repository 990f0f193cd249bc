pub mod blob;
pub mod db;
pub mod documents;
pub mod migrations;
pub mod repository;

pub use blob::{BlobStore, SqliteBlobStore};
pub use db::Database;
pub use documents::{
    Document, DocumentSchema, FieldKind, Filter, MetadataStore, SqliteMetadataStore,
    UpdateOptions, WriteResult,
};
pub use repository::{movie_schema, CatalogRepository};
