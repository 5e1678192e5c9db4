use crate::error::{FlywheelError, Result};

/// Cosine similarity between two vectors of equal dimension.
///
/// Zero-magnitude vectors are rejected, they have no direction to compare.
pub fn cosine_similarity(vec1: &[f32], vec2: &[f32]) -> Result<f32> {
    if vec1.len() != vec2.len() {
        return Err(FlywheelError::Validation(format!(
            "Vector dimensions don't match: {} vs {}",
            vec1.len(),
            vec2.len()
        )));
    }

    let mag1: f32 = vec1.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag2: f32 = vec2.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag1 < f32::EPSILON || mag2 < f32::EPSILON {
        return Err(FlywheelError::Validation(
            "Zero magnitude vector detected".to_string(),
        ));
    }

    let dot_product: f32 = vec1.iter().zip(vec2.iter()).map(|(a, b)| a * b).sum();
    Ok(dot_product / (mag1 * mag2))
}

/// Cosine distance, never negative. Smaller means more similar.
pub fn cosine_distance(vec1: &[f32], vec2: &[f32]) -> Result<f32> {
    Ok((1.0 - cosine_similarity(vec1, vec2)?).max(0.0))
}

/// Similarity reported to callers: `1 - distance`, clamped into `[0, 1]`.
pub fn distance_to_similarity(distance: f32) -> f32 {
    (1.0 - distance).clamp(0.0, 1.0)
}
