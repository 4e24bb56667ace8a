//! etl-domain: the normalized relational schema, the raw-extraction staging
//! table, custom-field mapping, and the vector bridge table, plus the
//! [`RelationalStore`] trait the transform worker writes through.

pub mod bridge;
pub mod entities;
pub mod fake;
pub mod integration;
pub mod mapping;
pub mod raw;
pub mod store;

pub use bridge::{VectorBridgeRecord, VectorType};
pub use entities::{EmbeddingKey, EntityRow, EntityTable};
pub use fake::InMemoryStore;
pub use integration::{IntegrationSettings, Provider};
pub use mapping::CustomFieldMapping;
pub use raw::{RawExtractionRecord, RawStatus};
pub use store::{EntityLookup, RelationalStore, StoreError, StoreResult, TransformTx};
