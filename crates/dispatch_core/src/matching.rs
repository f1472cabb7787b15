//! Candidate ranking: the match score and straight-line ETA estimate.
//!
//! The score combines proximity and driver rating; ties are broken by
//! shorter distance so a closer driver always wins an equal score.

use std::cmp::Ordering;

use crate::location::NearbyDriver;

/// Score weight of the proximity component.
pub const PROXIMITY_WEIGHT: f64 = 70.0;

/// Score weight of the rating component.
pub const RATING_WEIGHT: f64 = 30.0;

/// Rating scale ceiling.
pub const MAX_RATING: f64 = 5.0;

/// Minimum ETA reported for any candidate (minutes).
const MIN_ETA_MINUTES: f64 = 1.0;

/// Higher is better. Proximity is normalized against the search radius so
/// a driver at the origin scores the full proximity weight and one at the
/// radius edge scores none of it.
pub fn score_candidate(distance_km: f64, radius_km: f64, rating: f64) -> f64 {
    let proximity = if radius_km > 0.0 {
        (1.0 - distance_km / radius_km).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let rating = (rating / MAX_RATING).clamp(0.0, 1.0);
    proximity * PROXIMITY_WEIGHT + rating * RATING_WEIGHT
}

/// Straight-line pickup ETA at an average city speed. Route ETA is a
/// collaborator concern.
pub fn estimate_eta_minutes(distance_km: f64, avg_speed_kmh: f64) -> f64 {
    if distance_km <= 0.0 || avg_speed_kmh <= 0.0 {
        return MIN_ETA_MINUTES;
    }
    ((distance_km / avg_speed_kmh) * 60.0).max(MIN_ETA_MINUTES)
}

/// Best candidate by score, shorter distance winning ties.
pub fn choose_best(candidates: &[NearbyDriver], radius_km: f64) -> Option<(&NearbyDriver, f64)> {
    candidates
        .iter()
        .map(|candidate| {
            let score = score_candidate(candidate.distance_km, radius_km, candidate.profile.rating);
            (candidate, score)
        })
        .max_by(|(a, score_a), (b, score_b)| {
            score_a
                .partial_cmp(score_b)
                .unwrap_or(Ordering::Equal)
                .then_with(|| {
                    // Reversed so the shorter distance compares as greater.
                    b.distance_km
                        .partial_cmp(&a.distance_km)
                        .unwrap_or(Ordering::Equal)
                })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::DriverProfile;
    use crate::session::DriverId;

    fn candidate(driver_id: u64, distance_km: f64, rating: f64) -> NearbyDriver {
        NearbyDriver {
            driver_id: DriverId(driver_id),
            lat: 4.61,
            lng: -74.08,
            distance_km,
            profile: DriverProfile {
                driver_id: DriverId(driver_id),
                name: format!("driver-{driver_id}"),
                rating,
                vehicle: None,
                tier_ids: Vec::new(),
            },
        }
    }

    #[test]
    fn closer_driver_scores_higher_at_equal_rating() {
        let near = score_candidate(0.5, 5.0, 4.5);
        let far = score_candidate(4.0, 5.0, 4.5);
        assert!(near > far);
    }

    #[test]
    fn equal_scores_break_ties_by_shorter_distance() {
        // Proximity clamps to zero at or beyond the radius, so these two
        // candidates carry the exact same score and only the distance
        // tie-break separates them.
        let farther = candidate(1, 7.0, 4.0);
        let closer = candidate(2, 6.0, 4.0);
        let score_far = score_candidate(7.0, 5.0, 4.0);
        let score_close = score_candidate(6.0, 5.0, 4.0);
        assert_eq!(score_far, score_close);

        let candidates = [farther, closer];
        let (best, _) = choose_best(&candidates, 5.0).expect("candidate");
        assert_eq!(best.driver_id, DriverId(2));
    }

    #[test]
    fn rating_matters_but_cannot_beat_large_distance_gap() {
        let near_low_rating = candidate(1, 0.5, 3.0);
        let far_high_rating = candidate(2, 4.5, 5.0);
        let candidates = [far_high_rating, near_low_rating];
        let (best, _) = choose_best(&candidates, 5.0).expect("candidate");
        assert_eq!(best.driver_id, DriverId(1));
    }

    #[test]
    fn empty_candidate_list_yields_none() {
        assert!(choose_best(&[], 5.0).is_none());
    }

    #[test]
    fn eta_has_a_floor_of_one_minute() {
        assert_eq!(estimate_eta_minutes(0.0, 30.0), 1.0);
        assert_eq!(estimate_eta_minutes(0.1, 30.0), 1.0);
        let eta = estimate_eta_minutes(10.0, 30.0);
        assert!((eta - 20.0).abs() < 1e-9);
    }
}
