//! Event-to-text composition for embedding.
//!
//! The text is intentionally redundant: the name appears twice, artists are
//! repeated under a synonym, venue quality is spelled out in words. That
//! redundancy biases cosine similarity toward name/artist matches when users
//! describe what they want in free text.

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};

/// Everything the composer needs for one event, as selected by the
/// embedding sweep (artists/tags pre-aggregated, venue columns joined in).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EmbeddingSource {
    pub id: i64,
    pub event_name: String,
    pub category: String,
    pub location: String,
    pub description: String,
    pub start_date: DateTime<Utc>,
    pub artists: Option<String>,
    pub tags: Option<String>,
    pub place_types: Option<String>,
    pub rating: Option<f64>,
    pub user_ratings_total: Option<i32>,
    pub popularity_score: Option<f64>,
    pub city: Option<String>,
}

const MAX_DESCRIPTION_CHARS: usize = 1000;

pub fn compose_event_text(source: &EmbeddingSource) -> String {
    let mut text = String::new();

    let name = clean_text(&source.event_name);
    if !name.is_empty() {
        // Repeated once for emphasis.
        text.push_str(&format!("Event: {name}. Title: {name}. "));
    }

    let category = clean_text(&source.category);
    if !category.is_empty() {
        text.push_str(&format!("Category: {category}. "));
    }

    if let Some(artists) = source.artists.as_deref() {
        let artists = clean_text(artists);
        if !artists.is_empty() {
            // Synonym repetition for better matching.
            text.push_str(&format!("Artists: {artists}. Performers: {artists}. "));
        }
    }

    if let Some(tags) = source.tags.as_deref() {
        let tags = clean_text(tags);
        if !tags.is_empty() {
            text.push_str(&format!("Tags: {tags}. "));
        }
    }

    let location = clean_text(&source.location);
    if !location.is_empty() {
        text.push_str(&format!("Location: {location}. "));
    }

    if let Some(place_types) = source.place_types.as_deref() {
        let place_types = clean_text(place_types);
        if !place_types.is_empty() {
            text.push_str(&format!("Venue Type: {place_types}. "));
        }
    }

    if let Some(rating) = source.rating {
        text.push_str(&format!("Venue Rating: {rating} stars"));
        if let Some(reviews) = source.user_ratings_total.filter(|n| *n > 0) {
            text.push_str(&format!(" based on {reviews} reviews"));
        }
        text.push_str(". ");
    }

    if let Some(score) = source.popularity_score {
        text.push_str("Venue Popularity: ");
        text.push_str(popularity_band(score));
        if let Some(city) = source.city.as_deref().filter(|c| !c.is_empty()) {
            text.push_str(", ");
            text.push_str(&city_qualifier(score, city));
        }
        text.push_str(". ");
    }

    let time_context = time_context(source.start_date);
    text.push_str(&format!("Time: {time_context}. "));

    let description = clean_text(&source.description);
    if !description.is_empty() {
        let truncated: String = description.chars().take(MAX_DESCRIPTION_CHARS).collect();
        text.push_str(&format!("Description: {truncated}"));
    }

    text.trim().to_string()
}

fn popularity_band(score: f64) -> &'static str {
    if score >= 90.0 {
        "extremely popular venue"
    } else if score >= 80.0 {
        "highly popular venue"
    } else if score >= 70.0 {
        "very popular venue"
    } else if score >= 50.0 {
        "popular venue"
    } else {
        "venue with moderate popularity"
    }
}

fn city_qualifier(score: f64, city: &str) -> String {
    if score >= 85.0 {
        format!("top-rated venue in {city}")
    } else if score >= 70.0 {
        format!("well-known venue in {city}")
    } else {
        format!("venue in {city}")
    }
}

/// Weekend/weekday, time-of-day bucket, and season for the start date.
fn time_context(start: DateTime<Utc>) -> String {
    let day = match start.weekday() {
        Weekday::Sat | Weekday::Sun => "weekend",
        _ => "weekday",
    };

    let time_of_day = match start.hour() {
        5..=11 => "morning",
        12..=16 => "afternoon",
        17..=20 => "evening",
        _ => "night",
    };

    let season = match start.month() {
        12 | 1 | 2 => "winter",
        3..=5 => "spring",
        6..=8 => "summer",
        _ => "autumn",
    };

    format!("{day} {time_of_day} {season}")
}

/// Collapse whitespace runs and strip characters other than letters
/// (diacritics included), digits, spaces and `.,!?'-`.
pub fn clean_text(text: &str) -> String {
    let kept: String = text
        .chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .filter(|c| c.is_alphanumeric() || *c == ' ' || ".,!?'-".contains(*c))
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn source() -> EmbeddingSource {
        EmbeddingSource {
            id: 1,
            event_name: "Nocny Koncert".into(),
            category: "Muzyka".into(),
            location: "Warszawa".into(),
            description: "Wieczór z muzyką na żywo.".into(),
            // Saturday 2025-07-12 21:30 UTC: weekend night summer.
            start_date: Utc.with_ymd_and_hms(2025, 7, 12, 21, 30, 0).unwrap(),
            artists: Some("Brodka, Miuosh".into()),
            tags: Some("rock alternatywny".into()),
            place_types: Some("night_club,bar".into()),
            rating: Some(4.6),
            user_ratings_total: Some(1200),
            popularity_score: Some(92.0),
            city: Some("Warszawa".into()),
        }
    }

    #[test]
    fn composition_order_and_redundancy() {
        let text = compose_event_text(&source());
        assert!(text.starts_with("Event: Nocny Koncert. Title: Nocny Koncert. "));
        let artists_at = text.find("Artists: Brodka, Miuosh").unwrap();
        let performers_at = text.find("Performers: Brodka, Miuosh").unwrap();
        assert!(artists_at < performers_at);
        assert!(text.contains("Venue Rating: 4.6 stars based on 1200 reviews."));
        assert!(text.contains("Time: weekend night summer."));
    }

    #[test]
    fn high_popularity_in_a_city_gets_both_phrases() {
        let text = compose_event_text(&source());
        assert!(text.contains("extremely popular venue"));
        assert!(text.contains("top-rated venue in Warszawa"));
    }

    #[test]
    fn moderate_popularity_without_city() {
        let mut src = source();
        src.popularity_score = Some(40.0);
        src.city = None;
        let text = compose_event_text(&src);
        assert!(text.contains("Venue Popularity: venue with moderate popularity."));
        assert!(!text.contains(" in "));
    }

    #[test]
    fn band_boundaries() {
        for (score, band) in [
            (90.0, "extremely popular venue"),
            (80.0, "highly popular venue"),
            (70.0, "very popular venue"),
            (50.0, "popular venue"),
            (49.9, "venue with moderate popularity"),
        ] {
            assert_eq!(popularity_band(score), band, "score {score}");
        }
    }

    #[test]
    fn missing_venue_block_is_omitted() {
        let mut src = source();
        src.place_types = None;
        src.rating = None;
        src.user_ratings_total = None;
        src.popularity_score = None;
        src.city = None;
        let text = compose_event_text(&src);
        assert!(!text.contains("Venue"));
        assert!(text.contains("Location: Warszawa."));
    }

    #[test]
    fn description_is_truncated_to_a_thousand_chars() {
        let mut src = source();
        src.description = "ż".repeat(1500);
        let text = compose_event_text(&src);
        let description = text.split("Description: ").nth(1).unwrap();
        assert_eq!(description.chars().count(), 1000);
    }

    #[test]
    fn clean_text_strips_symbols_and_collapses_whitespace() {
        assert_eq!(
            clean_text("Zażółć  gęślą\njaźń — 100% hit!"),
            "Zażółć gęślą jaźń 100 hit!"
        );
        assert_eq!(clean_text("<b>bold</b>"), "bboldb");
    }

    #[test]
    fn time_buckets() {
        let morning = Utc.with_ymd_and_hms(2025, 1, 6, 8, 0, 0).unwrap();
        assert_eq!(time_context(morning), "weekday morning winter");
        let autumn_afternoon = Utc.with_ymd_and_hms(2025, 10, 5, 14, 0, 0).unwrap();
        assert_eq!(time_context(autumn_afternoon), "weekend afternoon autumn");
        let spring_evening = Utc.with_ymd_and_hms(2025, 4, 30, 18, 0, 0).unwrap();
        assert_eq!(time_context(spring_evening), "weekday evening spring");
        let night = Utc.with_ymd_and_hms(2025, 6, 2, 2, 0, 0).unwrap();
        assert_eq!(time_context(night), "weekday night summer");
    }
}
