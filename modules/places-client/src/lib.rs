pub mod error;
pub mod types;

pub use error::{PlacesError, Result};
pub use types::{AddressComponent, DetailsResponse, PlaceDetails, TextSearchResponse};

const BASE_URL: &str = "https://maps.googleapis.com/maps/api";

/// Detail fields requested from the places provider.
const DETAIL_FIELDS: &str = "name,formatted_address,geometry,address_component,\
formatted_phone_number,website,rating,user_ratings_total,price_level,type,\
photo,review,opening_hours";

/// Client for the places provider's text-search and details endpoints.
/// Authentication is an API key passed as a query parameter.
pub struct PlacesClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl PlacesClient {
    pub fn new(client: reqwest::Client, api_key: String) -> Self {
        Self {
            client,
            api_key,
            base_url: BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    /// Text-search for a place. Returns the first result's place id, or
    /// `None` when the provider has no match (`ZERO_RESULTS`).
    pub async fn find_place_id(&self, query: &str) -> Result<Option<String>> {
        let url = format!("{}/place/textsearch/json", self.base_url);
        tracing::debug!(query, "places text search");

        let resp = self
            .client
            .get(&url)
            .query(&[("query", query), ("key", self.api_key.as_str())])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(PlacesError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: TextSearchResponse = resp
            .json()
            .await
            .map_err(|e| PlacesError::Parse(e.to_string()))?;

        match body.status.as_str() {
            "OK" | "ZERO_RESULTS" => {}
            other => {
                return Err(PlacesError::Status {
                    status: other.to_string(),
                    message: body.error_message.unwrap_or_default(),
                })
            }
        }

        match body.results.into_iter().next() {
            Some(result) => {
                tracing::debug!(
                    place_id = %result.place_id,
                    name = result.name.as_deref().unwrap_or(""),
                    "places match"
                );
                Ok(Some(result.place_id))
            }
            None => {
                tracing::debug!(query, "no places results");
                Ok(None)
            }
        }
    }

    /// Fetch detailed attributes for a place id.
    pub async fn place_details(&self, place_id: &str) -> Result<PlaceDetails> {
        let url = format!("{}/place/details/json", self.base_url);

        let resp = self
            .client
            .get(&url)
            .query(&[
                ("place_id", place_id),
                ("fields", DETAIL_FIELDS),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(PlacesError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: DetailsResponse = resp
            .json()
            .await
            .map_err(|e| PlacesError::Parse(e.to_string()))?;

        if body.status != "OK" {
            return Err(PlacesError::Status {
                status: body.status,
                message: body.error_message.unwrap_or_default(),
            });
        }

        body.result
            .ok_or_else(|| PlacesError::Parse("details response missing 'result'".to_string()))
    }
}
