//! Semantic search: embedding provider seam, cosine similarity, and the
//! assistant service that ranks listings against a free-text query.

pub mod assistant;
pub mod provider;
pub mod similarity;

pub use assistant::{AssistantService, SearchResponse};
pub use provider::{EmbeddingProvider, GeminiProvider};
