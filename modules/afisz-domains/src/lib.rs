pub mod artists;
pub mod embeddings;
pub mod events;
pub mod links;
pub mod registry;
pub mod search;
pub mod tags;
pub mod venues;

pub use artists::{Artist, ArtistRegistry};
pub use embeddings::{EmbeddingService, EmbeddingWorker, GuardedEmbedder};
pub use events::{Event, EventGraph, EventIntegrator};
pub use search::find_similar;
pub use tags::{normalize_tag, Tag, TagRegistry};
pub use venues::{PlacesApi, Venue, VenueEnricher};
