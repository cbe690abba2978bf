pub mod enricher;
pub mod model;
pub mod popularity;

pub use enricher::{EnricherOptions, PlacesApi, VenueEnricher};
pub use model::Venue;
pub use popularity::popularity_score;
