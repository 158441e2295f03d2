use crate::random_cut_forest::alias::FType;

use ndarray::Array1;

use std::collections::VecDeque;

/// Sliding window over the last `shingle_size` raw inputs.
///
/// Each raw input has `base_dimensions` values. The produced point lists inputs oldest
/// first, with zeros standing in for inputs not seen yet.
///
/// # Example
///
/// ```
/// use light_rcf::random_cut_forest::shingle::ShingleBuffer;
///
/// let mut shingle: ShingleBuffer<f32> = ShingleBuffer::new(1, 3);
/// assert_eq!(shingle.push(&[1.0]).to_vec(), vec![0.0, 0.0, 1.0]);
/// assert_eq!(shingle.push(&[2.0]).to_vec(), vec![0.0, 1.0, 2.0]);
/// assert_eq!(shingle.push(&[3.0]).to_vec(), vec![1.0, 2.0, 3.0]);
/// assert_eq!(shingle.push(&[4.0]).to_vec(), vec![2.0, 3.0, 4.0]);
/// ```
#[derive(Clone, Debug)]
pub struct ShingleBuffer<F> {
    base_dimensions: usize,
    shingle_size: usize,
    window: VecDeque<F>,
    seen: u64,
}

impl<F: FType> ShingleBuffer<F> {
    pub fn new(base_dimensions: usize, shingle_size: usize) -> Self {
        let len = base_dimensions * shingle_size;
        ShingleBuffer {
            base_dimensions,
            shingle_size,
            window: std::iter::repeat(F::zero()).take(len).collect(),
            seen: 0,
        }
    }

    /// Slide `raw` into the window and return the resulting point.
    ///
    /// `raw` must hold exactly `base_dimensions` values; the forest checks this before
    /// calling.
    pub fn push(&mut self, raw: &[F]) -> Array1<F> {
        debug_assert_eq!(raw.len(), self.base_dimensions);
        for &value in raw {
            self.window.pop_front();
            self.window.push_back(value);
        }
        self.seen += 1;
        self.window.iter().copied().collect()
    }

    /// Whether `shingle_size` inputs were pushed, so no padding is left.
    pub fn is_full(&self) -> bool {
        self.seen >= self.shingle_size as u64
    }

    /// Number of inputs pushed so far.
    pub fn seen(&self) -> u64 {
        self.seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_padding_until_full() {
        let k = 4;
        let mut shingle: ShingleBuffer<f64> = ShingleBuffer::new(1, k);
        for i in 1..k {
            let point = shingle.push(&[i as f64]);
            assert!(!shingle.is_full());
            let zeros = k - i;
            assert!(point.iter().take(zeros).all(|&v| v == 0.0));
            assert_eq!(point[k - 1], i as f64);
        }
        let point = shingle.push(&[k as f64]);
        assert!(shingle.is_full());
        assert_eq!(point.to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_vector_inputs() {
        let mut shingle: ShingleBuffer<f64> = ShingleBuffer::new(2, 2);
        assert_eq!(shingle.push(&[1.0, 2.0]).to_vec(), vec![0.0, 0.0, 1.0, 2.0]);
        assert_eq!(shingle.push(&[3.0, 4.0]).to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(shingle.push(&[5.0, 6.0]).to_vec(), vec![3.0, 4.0, 5.0, 6.0]);
        assert_eq!(shingle.seen(), 3);
    }

    #[test]
    fn test_shingle_of_one_is_identity() {
        let mut shingle: ShingleBuffer<f32> = ShingleBuffer::new(3, 1);
        assert_eq!(shingle.push(&[1.0, 2.0, 3.0]).to_vec(), vec![1.0, 2.0, 3.0]);
        assert!(shingle.is_full());
    }
}
