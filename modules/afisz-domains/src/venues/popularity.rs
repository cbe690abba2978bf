/// Bayesian-adjusted venue popularity in [0, 100].
///
/// The rating is normalized to [0, 1] and blended with a global prior of
/// 4.0/5.0, weighted by a confidence factor that saturates at 500 ratings.
/// The same confidence factor doubles as a quantity boost. A venue without a
/// rating has no popularity score.
pub fn popularity_score(rating: Option<f64>, user_ratings_total: i32) -> Option<f64> {
    const MAX_RATING: f64 = 5.0;
    const RATINGS_FOR_FULL_CONFIDENCE: f64 = 500.0;
    const GLOBAL_MEAN: f64 = 4.0 / MAX_RATING;

    let rating = rating?;
    let n = user_ratings_total.max(0) as f64;

    let normalized = rating / MAX_RATING;
    let confidence = ((1.0 + n).ln() / (1.0 + RATINGS_FOR_FULL_CONFIDENCE).ln()).min(1.0);
    let bayesian = normalized * confidence + GLOBAL_MEAN * (1.0 - confidence);
    let quantity = confidence;

    Some((bayesian * 0.7 + quantity * 0.3) * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_rating_means_no_score() {
        assert!(popularity_score(None, 1200).is_none());
    }

    #[test]
    fn well_reviewed_venue_lands_in_expected_band() {
        // rating 4.6 over 1200 ratings: confidence capped at 1, so the score
        // is (0.7 * 0.92 + 0.3) * 100.
        let score = popularity_score(Some(4.6), 1200).unwrap();
        assert!((80.0..=95.0).contains(&score), "score was {score}");
        assert!((score - 94.4).abs() < 0.01);
    }

    #[test]
    fn monotone_in_rating_for_fixed_volume() {
        let mut prev = f64::MIN;
        for rating in [1.0, 2.0, 3.0, 4.0, 4.5, 5.0] {
            let score = popularity_score(Some(rating), 200).unwrap();
            assert!(score >= prev, "score dropped at rating {rating}");
            prev = score;
        }
    }

    #[test]
    fn monotone_in_volume_for_high_rating() {
        let mut prev = f64::MIN;
        for n in [0, 1, 10, 100, 500, 5000] {
            let score = popularity_score(Some(4.8), n).unwrap();
            assert!(score >= prev, "score dropped at {n} ratings");
            prev = score;
        }
    }

    #[test]
    fn unrated_venue_with_reviews_scores_from_the_prior_only() {
        // rating 0.0 is a valid (terrible) rating; confidence pulls the
        // score toward zero as volume grows.
        let low = popularity_score(Some(0.0), 5000).unwrap();
        let high = popularity_score(Some(0.0), 1).unwrap();
        assert!(low < high);
    }
}
