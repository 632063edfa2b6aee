//! # Amenity Scorer
//!
//! Turns a property address into per-category amenity scores using a
//! [`PlacesProvider`]. A category score blends how many places were found
//! (capped at five) with how close the nearest one is:
//!
//! ```text
//! score = 10 * (0.6 * min(n, 5) / 5 + 0.4 * (1 - nearest / radius))
//! ```
//!
//! rounded to one decimal, and `0.0` when nothing is in range.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::distance::Coordinates;
use super::places::{GeocodeOutcome, PlacesProvider, MAX_RADIUS_METERS, MAX_RESULTS};
use crate::schema::location::{AmenityScore, PointOfInterest, PropertyLocation};

/// Radius for every category except airports
pub const DEFAULT_RADIUS_METERS: f64 = 6_000.0;
pub const AIRPORT_RADIUS_METERS: f64 = 50_000.0;

const COUNT_CAP: usize = 5;
const STRONG_SCORE: f64 = 7.0;
const WEAK_SCORE: f64 = 3.0;

/// The fixed set of amenity categories every analysis covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmenityCategory {
    Markets,
    Gyms,
    BusStations,
    RailwayTerminals,
    Stadiums,
    Malls,
    Airports,
    Seaports,
}

impl AmenityCategory {
    pub const ALL: [AmenityCategory; 8] = [
        AmenityCategory::Markets,
        AmenityCategory::Gyms,
        AmenityCategory::BusStations,
        AmenityCategory::RailwayTerminals,
        AmenityCategory::Stadiums,
        AmenityCategory::Malls,
        AmenityCategory::Airports,
        AmenityCategory::Seaports,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Markets => "markets",
            Self::Gyms => "gyms",
            Self::BusStations => "bus_stations",
            Self::RailwayTerminals => "railway_terminals",
            Self::Stadiums => "stadiums",
            Self::Malls => "malls",
            Self::Airports => "airports",
            Self::Seaports => "seaports",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }

    /// Human label for advantages/disadvantages text
    pub fn label(&self) -> &'static str {
        match self {
            Self::Markets => "markets",
            Self::Gyms => "gyms",
            Self::BusStations => "bus stations",
            Self::RailwayTerminals => "railway terminals",
            Self::Stadiums => "stadiums",
            Self::Malls => "shopping malls",
            Self::Airports => "airports",
            Self::Seaports => "seaports",
        }
    }

    /// Place type the provider is queried with
    pub fn place_type(&self) -> &'static str {
        match self {
            Self::Markets => "market",
            Self::Gyms => "gym",
            Self::BusStations => "bus_station",
            Self::RailwayTerminals => "train_station",
            Self::Stadiums => "stadium",
            Self::Malls => "shopping_mall",
            Self::Airports => "airport",
            Self::Seaports => "ferry_terminal",
        }
    }

    pub fn radius_meters(&self) -> f64 {
        match self {
            Self::Airports => AIRPORT_RADIUS_METERS,
            _ => DEFAULT_RADIUS_METERS,
        }
    }
}

/// Category score from match count and nearest distance
pub fn category_score(count: usize, nearest_m: Option<f64>, radius_m: f64) -> f64 {
    let Some(nearest) = nearest_m else {
        return 0.0;
    };
    if count == 0 || radius_m <= 0.0 {
        return 0.0;
    }
    let density = count.min(COUNT_CAP) as f64 / COUNT_CAP as f64;
    let proximity = (1.0 - nearest / radius_m).clamp(0.0, 1.0);
    round1(10.0 * (0.6 * density + 0.4 * proximity))
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

pub struct AmenityScorer<P: PlacesProvider> {
    provider: P,
    poi_limit: u32,
}

impl<P: PlacesProvider> AmenityScorer<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            poi_limit: 10,
        }
    }

    /// Places returned per category (capped at the provider maximum)
    pub fn with_poi_limit(mut self, limit: u32) -> Self {
        self.poi_limit = limit.min(MAX_RESULTS);
        self
    }

    /// Nearby places of one category, nearest first, annotated with distance.
    ///
    /// Radius and limit are capped at the provider maxima. Places without
    /// coordinates are dropped. Nothing found is an empty list.
    pub async fn find_nearby(
        &self,
        center: Coordinates,
        category: AmenityCategory,
        radius_m: f64,
        limit: u32,
    ) -> Result<Vec<PointOfInterest>> {
        let radius = radius_m.min(MAX_RADIUS_METERS);
        let limit = limit.min(MAX_RESULTS);

        let places = self
            .provider
            .search_nearby(center, category.place_type(), radius, limit)
            .await?;

        let mut pois: Vec<PointOfInterest> = places
            .into_iter()
            .filter_map(|place| {
                let location = place.location?;
                let maps_url = place.maps_url.or_else(|| {
                    Some(format!(
                        "https://www.google.com/maps/search/?api=1&query={}",
                        urlencoding::encode(&format!("{},{}", location.lat, location.lng))
                    ))
                });
                Some(PointOfInterest {
                    name: place.name,
                    latitude: location.lat,
                    longitude: location.lng,
                    distance_meters: round2(center.distance_to(&location)),
                    rating: place.rating,
                    address: place.address,
                    maps_url,
                })
            })
            .collect();

        pois.sort_by(|a, b| a.distance_meters.total_cmp(&b.distance_meters));
        pois.truncate(limit as usize);
        Ok(pois)
    }

    /// Score one category using its own radius
    pub async fn score_category(
        &self,
        center: Coordinates,
        category: AmenityCategory,
    ) -> Result<AmenityScore> {
        let radius = category.radius_meters();
        let pois = self
            .find_nearby(center, category, radius, self.poi_limit)
            .await?;
        let nearest = pois.first().map(|p| p.distance_meters);

        Ok(AmenityScore {
            category: category.as_str().to_string(),
            score: category_score(pois.len(), nearest, radius),
            radius_meters: radius,
            nearest_distance_meters: nearest,
            pois,
        })
    }

    /// All eight categories, in canonical order
    pub async fn score_all(&self, center: Coordinates) -> Result<Vec<AmenityScore>> {
        let mut scores = Vec::with_capacity(AmenityCategory::ALL.len());
        for category in AmenityCategory::ALL {
            scores.push(self.score_category(center, category).await?);
        }
        Ok(scores)
    }

    /// Geocode and score one property.
    ///
    /// An address the provider cannot resolve yields a record with
    /// `geocoded: false`, no coordinates and no scores.
    pub async fn analyze(
        &self,
        property_id: &str,
        address: &str,
        region: Option<&str>,
    ) -> Result<PropertyLocation> {
        let geocoded = match self.provider.geocode(address, region).await? {
            GeocodeOutcome::Found(found) => found,
            GeocodeOutcome::NotFound { reason } => {
                tracing::warn!(property_id, address, "Geocoding failed: {}", reason);
                return Ok(PropertyLocation {
                    property_id: property_id.to_string(),
                    address: address.to_string(),
                    geocoded: false,
                    coordinates: None,
                    formatted_address: None,
                    amenities: Vec::new(),
                    overall_score: None,
                    advantages: Vec::new(),
                    disadvantages: Vec::new(),
                    notes: vec![format!("Could not geocode address: {}", reason)],
                });
            }
        };

        let amenities = self.score_all(geocoded.location).await?;
        let (advantages, disadvantages) = summarize(&amenities);

        Ok(PropertyLocation {
            property_id: property_id.to_string(),
            address: address.to_string(),
            geocoded: true,
            coordinates: Some(geocoded.location),
            formatted_address: Some(geocoded.formatted_address),
            overall_score: Some(overall_score(&amenities)),
            amenities,
            advantages,
            disadvantages,
            notes: Vec::new(),
        })
    }
}

/// Mean of the category scores, one decimal
pub fn overall_score(amenities: &[AmenityScore]) -> f64 {
    if amenities.is_empty() {
        return 0.0;
    }
    round1(amenities.iter().map(|a| a.score).sum::<f64>() / amenities.len() as f64)
}

/// Plain-language strengths and weaknesses from category scores
pub fn summarize(amenities: &[AmenityScore]) -> (Vec<String>, Vec<String>) {
    let mut advantages = Vec::new();
    let mut disadvantages = Vec::new();

    for amenity in amenities {
        let label = AmenityCategory::parse(&amenity.category)
            .map(|c| c.label())
            .unwrap_or(amenity.category.as_str());
        let radius_km = amenity.radius_meters / 1000.0;

        match amenity.nearest_distance_meters {
            Some(nearest) if amenity.score >= STRONG_SCORE => advantages.push(format!(
                "Good access to {}: {} within {:.0} km, nearest {:.1} km away",
                label,
                amenity.pois.len(),
                radius_km,
                nearest / 1000.0
            )),
            Some(nearest) if amenity.score <= WEAK_SCORE => disadvantages.push(format!(
                "Limited access to {}: nearest is {:.1} km away",
                label,
                nearest / 1000.0
            )),
            None => disadvantages.push(format!("No {} within {:.0} km", label, radius_km)),
            _ => {}
        }
    }

    (advantages, disadvantages)
}
