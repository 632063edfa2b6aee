//! # Places Provider
//!
//! The only seam to the external places/geocoding directory. The scorer
//! depends on [`PlacesProvider`]; [`GooglePlacesClient`] implements it over
//! the Google Places v1 REST API.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

use super::distance::Coordinates;

const GOOGLE_PLACES_BASE_URL: &str = "https://places.googleapis.com/v1";

const GEOCODE_FIELD_MASK: &str =
    "places.id,places.displayName,places.formattedAddress,places.location";
const NEARBY_FIELD_MASK: &str = "places.id,places.displayName,places.formattedAddress,places.location,places.rating,places.userRatingCount,places.googleMapsUri";

/// Largest circle the nearby search accepts
pub const MAX_RADIUS_METERS: f64 = 50_000.0;
/// Largest page the nearby search returns
pub const MAX_RESULTS: u32 = 20;

/// A resolved address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodedAddress {
    pub location: Coordinates,
    pub formatted_address: String,
    pub name: String,
    pub place_id: String,
}

/// Geocoding result. "Not found" is an answer, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum GeocodeOutcome {
    Found(GeocodedAddress),
    NotFound { reason: String },
}

/// A place exactly as the provider returned it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPlace {
    pub place_id: String,
    pub name: String,
    pub address: Option<String>,
    /// Missing when the provider has no coordinates for the place
    pub location: Option<Coordinates>,
    pub rating: Option<f64>,
    pub user_ratings_total: Option<u32>,
    pub maps_url: Option<String>,
}

#[async_trait]
pub trait PlacesProvider: Send + Sync {
    /// Resolve an address. `region` is an ISO 3166 alpha-2 hint ("NG").
    async fn geocode(&self, address: &str, region: Option<&str>) -> Result<GeocodeOutcome>;

    /// Places of one provider type within `radius_m` of `center`
    async fn search_nearby(
        &self,
        center: Coordinates,
        place_type: &str,
        radius_m: f64,
        limit: u32,
    ) -> Result<Vec<RawPlace>>;
}

/// Google Places (New) client
pub struct GooglePlacesClient {
    api_key: String,
    base_url: String,
    http: reqwest::Client,
}

impl GooglePlacesClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            api_key: api_key.into(),
            base_url: GOOGLE_PLACES_BASE_URL.to_string(),
            http,
        })
    }

    /// Reads `GOOGLE_MAPS_API_KEY`
    pub fn from_env() -> Result<Self> {
        let key = std::env::var("GOOGLE_MAPS_API_KEY")
            .context("GOOGLE_MAPS_API_KEY environment variable is not set")?;
        Self::new(key)
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    async fn post(
        &self,
        endpoint: &str,
        field_mask: &str,
        body: serde_json::Value,
    ) -> Result<Option<PlacesResponse>> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), endpoint);
        let response = self
            .http
            .post(&url)
            .header("X-Goog-Api-Key", &self.api_key)
            .header("X-Goog-FieldMask", field_mask)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Google Places request to {} failed", endpoint))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Google Places API error {}: {}", status, text);
        }

        let parsed = response
            .json::<PlacesResponse>()
            .await
            .context("Failed to parse Google Places response")?;
        Ok(Some(parsed))
    }
}

#[async_trait]
impl PlacesProvider for GooglePlacesClient {
    async fn geocode(&self, address: &str, region: Option<&str>) -> Result<GeocodeOutcome> {
        let mut body = json!({ "textQuery": address });
        if let Some(region) = region {
            body["regionCode"] = json!(region.to_uppercase());
        }

        let Some(response) = self
            .post("places:searchText", GEOCODE_FIELD_MASK, body)
            .await?
        else {
            return Ok(GeocodeOutcome::NotFound {
                reason: "Address not found".to_string(),
            });
        };

        let Some(place) = response.places.into_iter().next() else {
            return Ok(GeocodeOutcome::NotFound {
                reason: "Address not found".to_string(),
            });
        };

        let raw = place.into_raw();
        match raw.location {
            Some(location) => Ok(GeocodeOutcome::Found(GeocodedAddress {
                location,
                formatted_address: raw.address.unwrap_or_else(|| address.to_string()),
                name: raw.name,
                place_id: raw.place_id,
            })),
            None => Ok(GeocodeOutcome::NotFound {
                reason: "Location coordinates not available for this address".to_string(),
            }),
        }
    }

    async fn search_nearby(
        &self,
        center: Coordinates,
        place_type: &str,
        radius_m: f64,
        limit: u32,
    ) -> Result<Vec<RawPlace>> {
        let body = json!({
            "includedTypes": [place_type],
            "maxResultCount": limit.clamp(1, MAX_RESULTS),
            "locationRestriction": {
                "circle": {
                    "center": { "latitude": center.lat, "longitude": center.lng },
                    "radius": radius_m.min(MAX_RADIUS_METERS)
                }
            }
        });

        let response = self.post("places:searchNearby", NEARBY_FIELD_MASK, body).await?;
        Ok(response
            .map(|r| r.places.into_iter().map(ApiPlace::into_raw).collect())
            .unwrap_or_default())
    }
}

// Wire types for the Places v1 responses

#[derive(Debug, Default, Deserialize)]
struct PlacesResponse {
    #[serde(default)]
    places: Vec<ApiPlace>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPlace {
    #[serde(default)]
    id: String,
    display_name: Option<LocalizedText>,
    formatted_address: Option<String>,
    location: Option<LatLng>,
    rating: Option<f64>,
    user_rating_count: Option<u32>,
    google_maps_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LocalizedText {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct LatLng {
    latitude: Option<f64>,
    longitude: Option<f64>,
}

impl ApiPlace {
    fn into_raw(self) -> RawPlace {
        let location = self.location.and_then(|l| match (l.latitude, l.longitude) {
            (Some(lat), Some(lng)) => Some(Coordinates::new(lat, lng)),
            _ => None,
        });
        RawPlace {
            place_id: self.id,
            name: self
                .display_name
                .map(|d| d.text)
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "Unknown".to_string()),
            address: self.formatted_address,
            location,
            rating: self.rating,
            user_ratings_total: self.user_rating_count,
            maps_url: self.google_maps_uri,
        }
    }
}
