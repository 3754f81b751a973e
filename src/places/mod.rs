//! Places search: the maps/places API that leads are sourced from.

pub mod client;
pub mod model;

pub use client::{PlaceDirectory, PlacesClient};
pub use model::{PlaceResult, SearchPage, SearchQuery};
