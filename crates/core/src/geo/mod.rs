//! # Geospatial Scoring
//!
//! Great-circle distance, a narrow places/geocoding provider seam, and the
//! amenity scorer the location crew's tools call into.

pub mod distance;
pub mod places;
pub mod scorer;

pub use distance::{distance_meters, Coordinates, EARTH_RADIUS_METERS};
pub use places::{GeocodeOutcome, GeocodedAddress, GooglePlacesClient, PlacesProvider, RawPlace};
pub use scorer::{
    category_score, overall_score, summarize, AmenityCategory, AmenityScorer,
    AIRPORT_RADIUS_METERS, DEFAULT_RADIUS_METERS,
};
