use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct TextSearchResponse {
    pub status: String,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub results: Vec<TextSearchResult>,
}

#[derive(Debug, Deserialize)]
pub struct TextSearchResult {
    pub place_id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DetailsResponse {
    pub status: String,
    #[serde(default)]
    pub error_message: Option<String>,
    pub result: Option<PlaceDetails>,
}

/// Detail fields requested from the provider. Opening hours and reviews come
/// back as raw JSON; only the review count is consumed downstream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlaceDetails {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub formatted_address: Option<String>,
    #[serde(default)]
    pub formatted_phone_number: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub user_ratings_total: Option<i32>,
    #[serde(default)]
    pub price_level: Option<i32>,
    #[serde(default)]
    pub geometry: Option<Geometry>,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub photos: Vec<Photo>,
    #[serde(default)]
    pub reviews: Vec<serde_json::Value>,
    #[serde(default)]
    pub address_components: Vec<AddressComponent>,
    #[serde(default)]
    pub opening_hours: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Geometry {
    pub location: LatLng,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Photo {
    pub photo_reference: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddressComponent {
    pub long_name: String,
    #[serde(default)]
    pub types: Vec<String>,
}
