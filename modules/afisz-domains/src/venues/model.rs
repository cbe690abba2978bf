use afisz_core::error::AfiszError;
use chrono::{DateTime, Duration, Utc};
use places_client::types::{AddressComponent, PlaceDetails};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

/// Longest photo reference we store; provider references can exceed the
/// column width.
const MAX_PHOTO_REFERENCE: usize = 1990;

/// A physical venue, keyed by the places provider's id. A row may be a stub
/// (scraped name only, `last_enriched_date` stamped) when enrichment failed.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Venue {
    pub place_id: String,
    pub place_name_scraped: Option<String>,
    pub place_name_canonical: Option<String>,
    pub formatted_address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub street_number: Option<String>,
    pub street: Option<String>,
    pub neighborhood: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub postal_code: Option<String>,
    pub website: Option<String>,
    pub phone_number: Option<String>,
    pub rating: Option<f64>,
    pub user_ratings_total: Option<i32>,
    pub popularity_score: Option<f64>,
    pub price_level: Option<i32>,
    /// Comma-joined provider type list.
    pub place_types: Option<String>,
    pub primary_photo_reference: Option<String>,
    pub review_count: Option<i32>,
    pub last_enriched_date: Option<DateTime<Utc>>,
}

impl Venue {
    pub async fn find_by_place_id(place_id: &str, pool: &PgPool) -> Result<Option<Self>, AfiszError> {
        sqlx::query_as::<_, Self>("SELECT * FROM places WHERE place_id = $1")
            .bind(place_id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_by_place_ids(
        place_ids: &[String],
        pool: &PgPool,
    ) -> Result<Vec<Self>, AfiszError> {
        sqlx::query_as::<_, Self>("SELECT * FROM places WHERE place_id = ANY($1)")
            .bind(place_ids)
            .fetch_all(pool)
            .await
            .map_err(Into::into)
    }

    /// Create a minimal row for a freshly resolved place id. A concurrent
    /// writer inserting the same id wins silently.
    pub async fn insert_stub(
        place_id: &str,
        scraped_name: &str,
        pool: &PgPool,
    ) -> Result<(), AfiszError> {
        sqlx::query(
            "INSERT INTO places (place_id, place_name_scraped) VALUES ($1, $2) \
             ON CONFLICT (place_id) DO NOTHING",
        )
        .bind(place_id)
        .bind(scraped_name)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Stamp `last_enriched_date = now` without touching attributes. Used by
    /// the enrichment fallback so a failing provider is not hammered on
    /// every access.
    pub async fn touch_enriched(place_id: &str, pool: &PgPool) -> Result<(), AfiszError> {
        sqlx::query("UPDATE places SET last_enriched_date = NOW() WHERE place_id = $1")
            .bind(place_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Write provider detail attributes onto the row and stamp
    /// `last_enriched_date = now`.
    pub async fn apply_details(
        place_id: &str,
        details: &PlaceDetails,
        popularity: Option<f64>,
        pool: &PgPool,
    ) -> Result<(), AfiszError> {
        let address = AddressParts::from_components(&details.address_components);
        let (latitude, longitude) = match &details.geometry {
            Some(geometry) => (Some(geometry.location.lat), Some(geometry.location.lng)),
            None => (None, None),
        };
        let place_types = if details.types.is_empty() {
            None
        } else {
            Some(details.types.join(","))
        };
        let photo_reference = details.photos.first().map(|photo| {
            photo
                .photo_reference
                .chars()
                .take(MAX_PHOTO_REFERENCE)
                .collect::<String>()
        });
        let review_count = i32::try_from(details.reviews.len()).unwrap_or(i32::MAX);

        sqlx::query(
            r#"
            UPDATE places SET
                place_name_canonical = $2,
                formatted_address = $3,
                latitude = $4,
                longitude = $5,
                street_number = $6,
                street = $7,
                neighborhood = $8,
                city = $9,
                state = $10,
                country = $11,
                postal_code = $12,
                website = $13,
                phone_number = $14,
                rating = $15,
                user_ratings_total = $16,
                popularity_score = $17,
                price_level = $18,
                place_types = $19,
                primary_photo_reference = $20,
                review_count = $21,
                last_enriched_date = NOW()
            WHERE place_id = $1
            "#,
        )
        .bind(place_id)
        .bind(&details.name)
        .bind(&details.formatted_address)
        .bind(latitude)
        .bind(longitude)
        .bind(&address.street_number)
        .bind(&address.street)
        .bind(&address.neighborhood)
        .bind(&address.city)
        .bind(&address.state)
        .bind(&address.country)
        .bind(&address.postal_code)
        .bind(&details.website)
        .bind(&details.formatted_phone_number)
        .bind(details.rating)
        .bind(details.user_ratings_total)
        .bind(popularity)
        .bind(details.price_level)
        .bind(place_types)
        .bind(photo_reference)
        .bind(review_count)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Place ids whose enrichment is older than the horizon (or missing).
    pub async fn stale_place_ids(
        older_than_days: i64,
        limit: i64,
        pool: &PgPool,
    ) -> Result<Vec<String>, AfiszError> {
        sqlx::query_scalar(
            r#"
            SELECT place_id FROM places
            WHERE last_enriched_date IS NULL
               OR last_enriched_date < NOW() - ($1 || ' days')::INTERVAL
            ORDER BY last_enriched_date ASC NULLS FIRST
            LIMIT $2
            "#,
        )
        .bind(older_than_days.to_string())
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn count(pool: &PgPool) -> Result<i64, AfiszError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM places")
            .fetch_one(pool)
            .await?;
        Ok(count)
    }

    pub fn is_stale(&self, horizon_days: i64, now: DateTime<Utc>) -> bool {
        match self.last_enriched_date {
            Some(enriched) => now - enriched > Duration::days(horizon_days),
            None => true,
        }
    }
}

/// Address fields extracted from the provider's `address_components`.
#[derive(Debug, Default)]
pub struct AddressParts {
    pub street_number: Option<String>,
    pub street: Option<String>,
    pub neighborhood: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub postal_code: Option<String>,
}

impl AddressParts {
    pub fn from_components(components: &[AddressComponent]) -> Self {
        let mut parts = Self::default();
        for component in components {
            let Some(kind) = component.types.first() else {
                continue;
            };
            let value = Some(component.long_name.clone());
            match kind.as_str() {
                "locality" => parts.city = value,
                "country" => parts.country = value,
                "postal_code" => parts.postal_code = value,
                "administrative_area_level_1" => parts.state = value,
                "sublocality" | "sublocality_level_1" => parts.neighborhood = value,
                "route" => parts.street = value,
                "street_number" => parts.street_number = value,
                _ => {}
            }
        }
        parts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(kind: &str, value: &str) -> AddressComponent {
        AddressComponent {
            long_name: value.to_string(),
            types: vec![kind.to_string()],
        }
    }

    #[test]
    fn address_components_map_to_fields() {
        let parts = AddressParts::from_components(&[
            component("street_number", "1"),
            component("route", "Defilad"),
            component("sublocality", "Śródmieście"),
            component("locality", "Warszawa"),
            component("administrative_area_level_1", "Mazowieckie"),
            component("country", "Poland"),
            component("postal_code", "00-901"),
        ]);
        assert_eq!(parts.street_number.as_deref(), Some("1"));
        assert_eq!(parts.street.as_deref(), Some("Defilad"));
        assert_eq!(parts.neighborhood.as_deref(), Some("Śródmieście"));
        assert_eq!(parts.city.as_deref(), Some("Warszawa"));
        assert_eq!(parts.state.as_deref(), Some("Mazowieckie"));
        assert_eq!(parts.country.as_deref(), Some("Poland"));
        assert_eq!(parts.postal_code.as_deref(), Some("00-901"));
    }

    #[test]
    fn unknown_component_types_are_ignored()  {
        let parts = AddressParts::from_components(&[component("plus_code", "X")]);
        assert!(parts.city.is_none());
    }

    #[test]
    fn staleness_uses_the_horizon() {
        let now = Utc::now();
        let venue = Venue {
            place_id: "p".into(),
            place_name_scraped: None,
            place_name_canonical: None,
            formatted_address: None,
            latitude: None,
            longitude: None,
            street_number: None,
            street: None,
            neighborhood: None,
            city: None,
            state: None,
            country: None,
            postal_code: None,
            website: None,
            phone_number: None,
            rating: None,
            user_ratings_total: None,
            popularity_score: None,
            price_level: None,
            place_types: None,
            primary_photo_reference: None,
            review_count: None,
            last_enriched_date: Some(now - Duration::days(31)),
        };
        assert!(venue.is_stale(30, now));
        assert!(!venue.is_stale(60, now));

        let never_enriched = Venue {
            last_enriched_date: None,
            ..venue
        };
        assert!(never_enriched.is_stale(30, now));
    }
}
