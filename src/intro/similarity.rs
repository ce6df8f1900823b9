use super::Fingerprint;

/// Dense, symmetric matrix of pairwise fingerprint similarities.
///
/// Entry `(i, j)` is `1 - hamming(fp_i, fp_j) / 64`. The diagonal is always 1.
#[derive(Clone, Debug, PartialEq)]
pub struct SimilarityMatrix {
    size: usize,
    data: Vec<f64>,
}

impl SimilarityMatrix {
    /// Builds the matrix for the given fingerprints. This runs in O(n^2) time.
    ///
    /// Only the upper triangle is computed; the lower triangle is mirrored from it.
    pub fn from_fingerprints(fingerprints: &[Fingerprint]) -> Self {
        let span = tracing::span!(tracing::Level::TRACE, "similarity_matrix");
        let _enter = span.enter();

        let n = fingerprints.len();
        let mut data = vec![0.0; n * n];

        for i in 0..n {
            for j in i..n {
                let similarity = fingerprints[i].similarity(&fingerprints[j]);
                data[i * n + j] = similarity;
                data[j * n + i] = similarity;
            }
        }

        tracing::debug!(samples = n, "built similarity matrix");

        Self { size: n, data }
    }

    /// Number of rows (and columns).
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Returns entry `(i, j)`.
    ///
    /// # Panics
    ///
    /// Panics if either index is out of bounds.
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        assert!(i < self.size && j < self.size, "index out of bounds");
        self.data[i * self.size + j]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn fingerprints() -> Vec<Fingerprint> {
        vec![
            Fingerprint(0),
            Fingerprint(0xFF),
            Fingerprint(0xFFFF_0000),
            Fingerprint(u64::MAX),
            Fingerprint(0),
        ]
    }

    #[test]
    fn test_diagonal_is_one() {
        let matrix = SimilarityMatrix::from_fingerprints(&fingerprints());
        for i in 0..matrix.len() {
            assert_eq!(matrix.get(i, i), 1.0);
        }
    }

    #[test]
    fn test_symmetric_and_bounded() {
        let matrix = SimilarityMatrix::from_fingerprints(&fingerprints());
        for i in 0..matrix.len() {
            for j in 0..matrix.len() {
                let s = matrix.get(i, j);
                assert_eq!(s, matrix.get(j, i));
                assert!((0.0..=1.0).contains(&s));
            }
        }
    }

    #[test]
    fn test_values() {
        let matrix = SimilarityMatrix::from_fingerprints(&fingerprints());
        assert_eq!(matrix.get(0, 1), 0.875);
        assert_eq!(matrix.get(0, 2), 0.75);
        assert_eq!(matrix.get(0, 3), 0.0);
        assert_eq!(matrix.get(0, 4), 1.0);
        let row: Vec<f64> = (0..matrix.len()).map(|j| matrix.get(3, j)).collect();
        assert_eq!(row, vec![0.0, 0.125, 0.25, 1.0, 0.0]);
    }

    #[test]
    fn test_empty() {
        let matrix = SimilarityMatrix::from_fingerprints(&[]);
        assert!(matrix.is_empty());
        assert_eq!(matrix.len(), 0);
    }
}
