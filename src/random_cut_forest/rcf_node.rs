use crate::random_cut_forest::alias::FType;

use ndarray::Array1;

use std::fmt;

/// Node of a random cut tree.
///
/// Leaves hold one point (`min_list == max_list`) and count duplicates in `mass`.
/// Internal nodes route `x[feature] < threshold` left, everything else right.
#[derive(Clone)]
pub struct Node<F> {
    pub parent: Option<usize>,
    pub is_leaf: bool,
    pub min_list: Array1<F>, // Bounding box of all the points below this node
    pub max_list: Array1<F>,
    pub feature: usize,
    pub threshold: F,
    pub left: Option<usize>,
    pub right: Option<usize>,
    pub mass: usize,
}

impl<F: FType> fmt::Display for Node<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_leaf {
            write!(f, "Leaf<point={:?}, mass={}>", self.min_list.to_vec(), self.mass)
        } else {
            write!(
                f,
                "Cut<feature={}, threshold={}, min={:?}, max={:?}, mass={}>",
                self.feature,
                self.threshold,
                self.min_list.to_vec(),
                self.max_list.to_vec(),
                self.mass
            )
        }
    }
}

impl<F: FType> Node<F> {
    pub fn leaf(point: &Array1<F>, parent: Option<usize>) -> Self {
        Node {
            parent,
            is_leaf: true,
            min_list: point.clone(),
            max_list: point.clone(),
            feature: 0,
            threshold: F::zero(),
            left: None,
            right: None,
            mass: 1,
        }
    }

    /// Per-dimension distance from `x` to the box, zero inside it.
    pub fn extensions(&self, x: &Array1<F>) -> Array1<F> {
        let e_min = (&self.min_list - x).mapv(|v| F::max(v, F::zero()));
        let e_max = (x - &self.max_list).mapv(|v| F::max(v, F::zero()));
        e_min + e_max
    }

    /// Smallest box holding both this node's box and `x`.
    pub fn merged_box(&self, x: &Array1<F>) -> (Array1<F>, Array1<F>) {
        let mut min_list = self.min_list.clone();
        let mut max_list = self.max_list.clone();
        min_list.zip_mut_with(x, |a, &b| *a = F::min(*a, b));
        max_list.zip_mut_with(x, |a, &b| *a = F::max(*a, b));
        (min_list, max_list)
    }

    /// Probability that a random cut over the merged box separates `x` from this box.
    pub fn separation_probability(&self, x: &Array1<F>) -> F {
        let extension = self.extensions(x).sum();
        if extension <= F::zero() {
            return F::zero();
        }
        let (min_list, max_list) = self.merged_box(x);
        let span = (&max_list - &min_list).sum();
        F::min(extension / span, F::one())
    }

    pub fn contains(&self, x: &Array1<F>) -> bool {
        self.min_list
            .iter()
            .zip(self.max_list.iter())
            .zip(x.iter())
            .all(|((&lo, &hi), &v)| lo <= v && v <= hi)
    }

    /// Grow the box to hold `x` and count it.
    pub fn absorb(&mut self, x: &Array1<F>) {
        self.min_list.zip_mut_with(x, |a, &b| *a = F::min(*a, b));
        self.max_list.zip_mut_with(x, |a, &b| *a = F::max(*a, b));
        self.mass += 1;
    }

    /// Whether `x` belongs to the left child.
    #[inline]
    pub fn goes_left(&self, x: &Array1<F>) -> bool {
        x[self.feature] < self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn boxed(min_list: Array1<f64>, max_list: Array1<f64>) -> Node<f64> {
        Node {
            parent: None,
            is_leaf: false,
            min_list,
            max_list,
            feature: 0,
            threshold: 0.5,
            left: None,
            right: None,
            mass: 2,
        }
    }

    #[test]
    fn test_extensions() {
        let node = boxed(array![0.0, 0.0], array![1.0, 1.0]);
        assert_eq!(node.extensions(&array![0.5, 0.5]), array![0.0, 0.0]);
        assert_eq!(node.extensions(&array![-1.0, 3.0]), array![1.0, 2.0]);
    }

    #[test]
    fn test_separation_probability() {
        let node = boxed(array![0.0, 0.0], array![1.0, 1.0]);
        assert_eq!(node.separation_probability(&array![0.2, 0.9]), 0.0);
        // merged spans 3 + 1, extension 2
        assert!((node.separation_probability(&array![3.0, 0.5]) - 0.5).abs() < 1e-12);

        let leaf = Node::leaf(&array![1.0, 1.0], None);
        assert_eq!(leaf.separation_probability(&array![1.0, 1.0]), 0.0);
        assert_eq!(leaf.separation_probability(&array![1.0, 2.0]), 1.0);
    }

    #[test]
    fn test_absorb_and_contains() {
        let mut leaf = Node::leaf(&array![1.0, 1.0], None);
        assert!(leaf.contains(&array![1.0, 1.0]));
        assert!(!leaf.contains(&array![2.0, 1.0]));
        leaf.absorb(&array![2.0, 0.0]);
        assert_eq!(leaf.min_list, array![1.0, 0.0]);
        assert_eq!(leaf.max_list, array![2.0, 1.0]);
        assert_eq!(leaf.mass, 2);
        assert!(leaf.contains(&array![1.5, 0.5]));
    }
}
