//! # Geo Tools
//!
//! Geocoding, nearby-place search and amenity scoring for the location
//! analyst. Each call builds its own [`GooglePlacesClient`] from
//! `GOOGLE_MAPS_API_KEY`.

use radkit::macros::tool;
use radkit::tools::ToolResult;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;

use crate::geo::{
    AmenityCategory, AmenityScorer, Coordinates, GeocodeOutcome, GooglePlacesClient,
    PlacesProvider,
};

fn places_client() -> Result<GooglePlacesClient, String> {
    GooglePlacesClient::from_env().map_err(|e| e.to_string())
}

/// Arguments for geocoding
#[derive(Deserialize, JsonSchema)]
pub struct GeocodeArgs {
    /// Free-text address, e.g. "Ojodu Berger, Lagos"
    pub address: String,
    /// ISO 3166 alpha-2 region hint, e.g. "NG"
    pub region: Option<String>,
}

#[tool(
    description = "Resolve an address to coordinates. Returns found=false when the address is unknown."
)]
pub async fn geocode_address(args: GeocodeArgs) -> ToolResult {
    let client = match places_client() {
        Ok(c) => c,
        Err(e) => return ToolResult::error(e),
    };

    match client.geocode(&args.address, args.region.as_deref()).await {
        Ok(GeocodeOutcome::Found(found)) => ToolResult::success(json!({
            "found": true,
            "lat": found.location.lat,
            "lng": found.location.lng,
            "formatted_address": found.formatted_address,
            "name": found.name,
        })),
        Ok(GeocodeOutcome::NotFound { reason }) => ToolResult::success(json!({
            "found": false,
            "reason": reason,
        })),
        Err(e) => ToolResult::error(format!("Geocoding failed: {}", e)),
    }
}

/// Arguments for a nearby search
#[derive(Deserialize, JsonSchema)]
pub struct NearbyArgs {
    pub lat: f64,
    pub lng: f64,
    /// One of: markets, gyms, bus_stations, railway_terminals, stadiums, malls, airports, seaports
    pub category: String,
    /// Search radius in meters (default: the category radius, max 50000)
    pub radius_meters: Option<f64>,
    /// Maximum places (default 10, max 20)
    pub limit: Option<u32>,
}

#[tool(
    description = "List places of one amenity category near a point, nearest first, with distances in meters."
)]
pub async fn nearby_places(args: NearbyArgs) -> ToolResult {
    let Some(category) = AmenityCategory::parse(&args.category) else {
        return ToolResult::error(format!("Unknown amenity category: {}", args.category));
    };
    let client = match places_client() {
        Ok(c) => c,
        Err(e) => return ToolResult::error(e),
    };

    let scorer = AmenityScorer::new(client);
    let radius = args.radius_meters.unwrap_or_else(|| category.radius_meters());
    match scorer
        .find_nearby(
            Coordinates::new(args.lat, args.lng),
            category,
            radius,
            args.limit.unwrap_or(10),
        )
        .await
    {
        Ok(pois) => ToolResult::success(json!({
            "category": category.as_str(),
            "count": pois.len(),
            "places": pois,
        })),
        Err(e) => ToolResult::error(format!("Nearby search failed: {}", e)),
    }
}

/// Arguments for a full amenity analysis
#[derive(Deserialize, JsonSchema)]
pub struct ScoreAmenitiesArgs {
    /// Property id from the research report
    pub property_id: String,
    pub address: String,
    /// ISO 3166 alpha-2 region hint, e.g. "NG"
    pub region: Option<String>,
}

#[tool(
    description = "Geocode a property address and score all eight amenity categories. Returns a complete PropertyLocation record."
)]
pub async fn score_amenities(args: ScoreAmenitiesArgs) -> ToolResult {
    let client = match places_client() {
        Ok(c) => c,
        Err(e) => return ToolResult::error(e),
    };

    let scorer = AmenityScorer::new(client);
    match scorer
        .analyze(&args.property_id, &args.address, args.region.as_deref())
        .await
    {
        Ok(location) => match serde_json::to_value(&location) {
            Ok(value) => ToolResult::success(value),
            Err(e) => ToolResult::error(format!("Failed to serialize analysis: {}", e)),
        },
        Err(e) => ToolResult::error(format!("Amenity analysis failed: {}", e)),
    }
}
