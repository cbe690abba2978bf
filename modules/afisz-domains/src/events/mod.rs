pub mod integrator;
pub mod model;
pub mod queries;

pub use integrator::{EventIntegrator, IntegrationStatus};
pub use model::{order_graphs_by, Event, EventGraph, NewEvent};
pub use queries::EventFilters;
