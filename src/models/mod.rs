pub mod deck;
pub mod edge;
pub mod node;
pub mod query;

pub use deck::{parse_timestamp, DeckCard, DeckRecord};
pub use edge::{month_key, parse_month_key, Edge, EdgeKey, MonthlyCounts};
pub use node::{is_valid_card_name, CardNode};
pub use query::{ScoredCard, SimilarityQuery, WeightConfig};

/// Opaque card name. Non-empty and free of control characters once it
/// reaches the graph.
pub type CardId = String;
