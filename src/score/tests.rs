use super::*;
use rust_decimal::Decimal;

fn similarity(native: f64) -> DistanceScore {
    to_distance(native, ScoreConvention::CosineSimilarity).expect("finite score should convert")
}

#[test]
fn cosine_similarity_anchor_points() {
    assert_eq!(similarity(1.0).value(), Decimal::ZERO);
    assert_eq!(similarity(-1.0).value(), Decimal::TWO);
    assert_eq!(similarity(0.0).value(), Decimal::ONE);
}

#[test]
fn decimal_conversion_has_no_float_drift() {
    // 1.0 - 0.7 in binary floating point is 0.30000000000000004
    assert_eq!(similarity(0.7).value(), Decimal::new(3, 1));
    assert_eq!(similarity(0.25).value(), Decimal::new(75, 2));
}

#[test]
fn similarity_conversion_is_monotonic() {
    let mut previous: Option<DistanceScore> = None;
    for step in -100..=100 {
        let native = f64::from(step) / 100.0;
        let distance = similarity(native);
        if let Some(prev) = previous {
            assert!(
                distance < prev,
                "distance for {} ({}) should be below {}",
                native,
                distance,
                prev
            );
        }
        previous = Some(distance);
    }
}

#[test]
fn cosine_distance_passes_through() {
    let distance = to_distance(0.125, ScoreConvention::CosineDistance).expect("finite score");
    assert_eq!(distance.value(), Decimal::new(125, 3));
}

#[test]
fn out_of_range_values_are_not_clamped() {
    assert_eq!(similarity(1.5).value(), Decimal::new(-5, 1));
    assert_eq!(similarity(-1.5).value(), Decimal::new(25, 1));
}

#[test]
fn non_finite_scores_are_rejected() {
    assert!(matches!(
        to_distance(f64::NAN, ScoreConvention::CosineSimilarity),
        Err(StoreError::InvalidScore(_))
    ));
    assert!(to_distance(f64::INFINITY, ScoreConvention::CosineDistance).is_err());
}

#[test]
fn conventions_per_backend() {
    assert_eq!(
        ScoreConvention::for_backend(BackendKind::VectorQdrant),
        Some(ScoreConvention::CosineSimilarity)
    );
    assert_eq!(
        ScoreConvention::for_backend(BackendKind::VectorPgvector),
        Some(ScoreConvention::CosineDistance)
    );
    assert_eq!(ScoreConvention::for_backend(BackendKind::DocMongo), None);
}

#[test]
fn display_is_normalized() {
    assert_eq!(similarity(0.5).to_string(), "0.5");
    assert_eq!(DistanceScore::ZERO.to_string(), "0");
}
