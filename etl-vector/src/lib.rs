//! etl-vector: deterministic point identity, the vector-index and
//! embedding-provider contracts the embedding worker drives, and the
//! text composition used to turn a committed row into the string that
//! gets embedded.

pub mod compose;
pub mod embedding;
pub mod identity;
pub mod index;

pub use compose::compose_text;
pub use embedding::{EmbeddingError, EmbeddingProvider, EmbeddingResult, EmbeddingScope};
pub use identity::{collection_name, point_id};
pub use index::{DistanceMetric, VectorIndex, VectorIndexError, VectorIndexResult, VectorPoint};
