//! Vector arithmetic shared by the index and the build pipeline.

/// Floor applied to a vector norm before dividing by it.
pub const NORM_EPSILON: f32 = 1e-10;

/// Euclidean norm of `v`.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scale `v` to unit length: `v / max(||v||, NORM_EPSILON)`.
///
/// The zero vector stays the zero vector.
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let norm = l2_norm(v).max(NORM_EPSILON);
    v.iter().map(|x| x / norm).collect()
}

/// In-place variant of [`normalize`].
pub fn normalize_in_place(v: &mut [f32]) {
    let norm = l2_norm(v).max(NORM_EPSILON);
    for x in v.iter_mut() {
        *x /= norm;
    }
}

/// Dot product of two equal-length vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Squared Euclidean distance of two equal-length vectors.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}
