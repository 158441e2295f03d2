use crate::error::{RcfError, Result};
use crate::random_cut_forest::alias::{from_f64, from_usize, FType};
use crate::random_cut_forest::config::ScoringPolicy;
use crate::random_cut_forest::rcf_node::Node;

use ndarray::Array1;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use std::fmt;

const EULER_MASCHERONI: f64 = 0.577_215_664_901_532_9;

/// Average path length of an unsuccessful search in a binary search tree over `n`
/// points, the usual isolation depth normaliser.
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_MASCHERONI) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Random cut tree over the points of one reservoir.
///
/// Nodes live in an arena; freed slots are reused. The tree owns its random source so
/// equal seeds and equal input sequences give equal shapes.
#[derive(Clone)]
pub struct RandomCutTree<F: FType> {
    rng: ChaCha8Rng,
    nodes: Vec<Node<F>>,
    free: Vec<usize>,
    root: Option<usize>,
}

impl<F: FType> fmt::Display for RandomCutTree<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "┌ RandomCutTree")?;
        self.recursive_repr(self.root, f, "│ ")
    }
}

impl<F: FType> RandomCutTree<F> {
    fn recursive_repr(
        &self,
        node_idx: Option<usize>,
        f: &mut fmt::Formatter<'_>,
        prefix: &str,
    ) -> fmt::Result {
        if let Some(idx) = node_idx {
            let node = &self.nodes[idx];
            writeln!(f, "{}├─{}", prefix, node)?;
            self.recursive_repr(node.left, f, &(prefix.to_owned() + "│ "))?;
            self.recursive_repr(node.right, f, &(prefix.to_owned() + "│ "))?;
        }
        Ok(())
    }

    pub fn new(seed: u64) -> Self {
        RandomCutTree {
            rng: ChaCha8Rng::seed_from_u64(seed),
            nodes: vec![],
            free: vec![],
            root: None,
        }
    }

    /// Number of points held, duplicates included.
    pub fn mass(&self) -> usize {
        self.root.map_or(0, |idx| self.nodes[idx].mass)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Live nodes, internal and leaves.
    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    fn alloc(&mut self, node: Node<F>) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, idx: usize) {
        let node = &mut self.nodes[idx];
        node.parent = None;
        node.left = None;
        node.right = None;
        node.mass = 0;
        self.free.push(idx);
    }

    /// Draw a cut over the box `[min_list, max_list]`: feature chosen proportionally to
    /// its span, threshold uniform in `(min, max]` of that feature.
    fn random_cut(&mut self, min_list: &Array1<F>, max_list: &Array1<F>) -> (usize, F) {
        let span = max_list - min_list;
        let cumsum = span
            .iter()
            .scan(F::zero(), |acc, &x| {
                *acc = *acc + x;
                Some(*acc)
            })
            .collect::<Vec<F>>();
        let total = cumsum.last().copied().unwrap_or_else(F::zero);
        let r = from_f64::<F>(self.rng.gen::<f64>()) * total;
        let feature = cumsum
            .iter()
            .position(|&val| val > r)
            .or_else(|| span.iter().rposition(|&s| s > F::zero()))
            .unwrap_or(0);

        let (lo, hi) = (min_list[feature], max_list[feature]);
        let u = from_f64::<F>(self.rng.gen::<f64>());
        let mut threshold = hi - u * (hi - lo);
        if threshold <= lo {
            threshold = hi;
        }
        (feature, threshold)
    }

    pub fn insert(&mut self, x: &Array1<F>) {
        self.root = match self.root {
            None => Some(self.alloc(Node::leaf(x, None))),
            Some(root_idx) => {
                let new_root = self.go_downwards(root_idx, x);
                self.nodes[new_root].parent = None;
                Some(new_root)
            }
        };
    }

    /// Insert `x` below `node_idx` and return the index of the subtree root, which is a
    /// new internal node when `x` gets cut off above `node_idx`.
    fn go_downwards(&mut self, node_idx: usize, x: &Array1<F>) -> usize {
        if !self.nodes[node_idx].contains(x) {
            let (min_list, max_list) = self.nodes[node_idx].merged_box(x);
            let (feature, threshold) = self.random_cut(&min_list, &max_list);

            let node = &self.nodes[node_idx];
            let value = x[feature];
            let separates = (value < threshold && threshold <= node.min_list[feature])
                || (node.max_list[feature] < threshold && threshold <= value);

            if separates {
                let parent_node = Node {
                    parent: node.parent,
                    is_leaf: false,
                    min_list,
                    max_list,
                    feature,
                    threshold,
                    left: None,
                    right: None,
                    mass: node.mass + 1,
                };
                let parent_idx = self.alloc(parent_node);
                let sibling_idx = self.alloc(Node::leaf(x, Some(parent_idx)));

                if value < threshold {
                    self.nodes[parent_idx].left = Some(sibling_idx);
                    self.nodes[parent_idx].right = Some(node_idx);
                } else {
                    self.nodes[parent_idx].left = Some(node_idx);
                    self.nodes[parent_idx].right = Some(sibling_idx);
                }
                self.nodes[node_idx].parent = Some(parent_idx);
                return parent_idx;
            }
        }

        // No cut above this node: grow the box and keep going down.
        let node = &mut self.nodes[node_idx];
        node.absorb(x);
        if node.is_leaf {
            // A leaf box is a single point, so reaching here means `x` is a duplicate.
            return node_idx;
        }
        if node.goes_left(x) {
            if let Some(left) = node.left {
                let child = self.go_downwards(left, x);
                self.nodes[child].parent = Some(node_idx);
                self.nodes[node_idx].left = Some(child);
            }
        } else if let Some(right) = node.right {
            let child = self.go_downwards(right, x);
            self.nodes[child].parent = Some(node_idx);
            self.nodes[node_idx].right = Some(child);
        }
        node_idx
    }

    /// Follow the cuts from the root down to a leaf.
    fn find_leaf(&self, x: &Array1<F>) -> Option<usize> {
        let mut node_idx = self.root?;
        loop {
            let node = &self.nodes[node_idx];
            if node.is_leaf {
                return Some(node_idx);
            }
            node_idx = if node.goes_left(x) { node.left? } else { node.right? };
        }
    }

    /// Remove one copy of `x`. Deleting a point the tree does not hold is an error.
    pub fn delete(&mut self, x: &Array1<F>) -> Result<()> {
        let leaf_idx = self
            .find_leaf(x)
            .ok_or_else(|| RcfError::TreeInvariant("delete from an empty tree".to_string()))?;
        let leaf = &self.nodes[leaf_idx];
        if leaf.min_list != *x {
            return Err(RcfError::TreeInvariant(format!(
                "point {:?} is not held by the tree",
                x.to_vec()
            )));
        }

        if leaf.mass > 1 {
            // Duplicates keep every box as is.
            let mut cursor = Some(leaf_idx);
            while let Some(idx) = cursor {
                self.nodes[idx].mass -= 1;
                cursor = self.nodes[idx].parent;
            }
            return Ok(());
        }

        let parent = leaf.parent;
        self.release(leaf_idx);
        let parent_idx = match parent {
            None => {
                self.root = None;
                return Ok(());
            }
            Some(parent_idx) => parent_idx,
        };

        let parent_node = &self.nodes[parent_idx];
        let sibling_idx = if parent_node.left == Some(leaf_idx) {
            parent_node.right
        } else {
            parent_node.left
        }
        .ok_or_else(|| RcfError::TreeInvariant(format!("node {parent_idx} has one child")))?;
        let grandparent = parent_node.parent;

        self.nodes[sibling_idx].parent = grandparent;
        match grandparent {
            None => self.root = Some(sibling_idx),
            Some(g) => {
                if self.nodes[g].left == Some(parent_idx) {
                    self.nodes[g].left = Some(sibling_idx);
                } else {
                    self.nodes[g].right = Some(sibling_idx);
                }
            }
        }
        self.release(parent_idx);

        let mut cursor = grandparent;
        while let Some(idx) = cursor {
            self.shrink_box(idx)?;
            self.nodes[idx].mass -= 1;
            cursor = self.nodes[idx].parent;
        }
        Ok(())
    }

    /// Recompute the box of an internal node from its children.
    fn shrink_box(&mut self, node_idx: usize) -> Result<()> {
        let node = &self.nodes[node_idx];
        let (left, right) = match (node.left, node.right) {
            (Some(left), Some(right)) => (left, right),
            _ => {
                return Err(RcfError::TreeInvariant(format!(
                    "internal node {node_idx} is missing a child"
                )))
            }
        };
        let mut min_list = self.nodes[left].min_list.clone();
        let mut max_list = self.nodes[left].max_list.clone();
        min_list.zip_mut_with(&self.nodes[right].min_list, |a, &b| *a = F::min(*a, b));
        max_list.zip_mut_with(&self.nodes[right].max_list, |a, &b| *a = F::max(*a, b));
        let node = &mut self.nodes[node_idx];
        node.min_list = min_list;
        node.max_list = max_list;
        Ok(())
    }

    /// Anomaly signal of `x` without inserting it.
    ///
    /// Walks the path `x` would take and, at every node, weighs the chance that an
    /// insertion would cut `x` off there. No random numbers are drawn, so scoring never
    /// changes the tree or its random source. A point equal to a held one is never cut
    /// off and scores zero.
    pub fn score(&self, x: &Array1<F>, policy: ScoringPolicy) -> F {
        let root_idx = match self.root {
            Some(idx) => idx,
            None => return F::zero(),
        };
        let total_mass = self.nodes[root_idx].mass;
        let normaliser = average_path_length(total_mass).max(1.0);

        let mut score = F::zero();
        let mut p_not_separated_yet = F::one();
        let mut node_idx = root_idx;
        let mut depth = 0usize;
        loop {
            let node = &self.nodes[node_idx];
            let p = node.separation_probability(x);
            if p > F::zero() {
                // A cut above this node isolates `x` at `depth + 1`.
                let signal = match policy {
                    ScoringPolicy::Displacement => {
                        from_usize::<F>(node.mass) / from_usize(total_mass)
                    }
                    ScoringPolicy::Depth => {
                        from_f64::<F>(2f64.powf(-((depth + 1) as f64) / normaliser))
                    }
                };
                score += p_not_separated_yet * p * signal;
            }
            p_not_separated_yet *= F::one() - p;
            if p_not_separated_yet <= F::zero() {
                break;
            }
            if node.is_leaf {
                // `x` duplicates this leaf. No cut ever isolates it, so it adds nothing
                // under either policy.
                break;
            }
            let child = if node.goes_left(x) { node.left } else { node.right };
            match child {
                Some(child) => node_idx = child,
                None => break,
            }
            depth += 1;
        }
        score
    }

    /// Every held point, repeated by its mass.
    pub fn points(&self) -> Vec<Array1<F>> {
        let mut points = Vec::with_capacity(self.mass());
        let mut stack: Vec<usize> = self.root.into_iter().collect();
        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx];
            if node.is_leaf {
                for _ in 0..node.mass {
                    points.push(node.min_list.clone());
                }
            } else {
                stack.extend(node.right);
                stack.extend(node.left);
            }
        }
        points
    }

    /// Depth of the deepest leaf, zero for a single leaf or an empty tree.
    pub fn height(&self) -> usize {
        let mut height = 0;
        let mut stack: Vec<(usize, usize)> = self.root.into_iter().map(|idx| (idx, 0)).collect();
        while let Some((idx, depth)) = stack.pop() {
            let node = &self.nodes[idx];
            height = height.max(depth);
            stack.extend(node.left.map(|child| (child, depth + 1)));
            stack.extend(node.right.map(|child| (child, depth + 1)));
        }
        height
    }

    /// Check parent links, cut partition, minimal boxes and masses.
    pub fn check_invariants(&self) -> Result<()> {
        let root_idx = match self.root {
            Some(idx) => idx,
            None => return Ok(()),
        };
        if self.nodes[root_idx].parent.is_some() {
            return Err(RcfError::TreeInvariant("root has a parent".to_string()));
        }
        self.check_subtree(root_idx).map(|_| ())
    }

    /// Returns the mass found below `node_idx`.
    fn check_subtree(&self, node_idx: usize) -> Result<usize> {
        let node = &self.nodes[node_idx];
        let broken = |what: &str| Err(RcfError::TreeInvariant(format!("node {node_idx}: {what}")));

        if node.is_leaf {
            if node.mass == 0 {
                return broken("leaf without mass");
            }
            if node.min_list != node.max_list {
                return broken("leaf box is not a point");
            }
            return Ok(node.mass);
        }

        let (left, right) = match (node.left, node.right) {
            (Some(left), Some(right)) => (left, right),
            _ => return broken("internal node is missing a child"),
        };
        for child in [left, right] {
            if self.nodes[child].parent != Some(node_idx) {
                return broken("child does not point back to its parent");
            }
        }
        let (l, r) = (&self.nodes[left], &self.nodes[right]);
        if l.max_list[node.feature] >= node.threshold {
            return broken("left subtree crosses the cut");
        }
        if r.min_list[node.feature] < node.threshold {
            return broken("right subtree crosses the cut");
        }
        let mut min_list = l.min_list.clone();
        let mut max_list = l.max_list.clone();
        min_list.zip_mut_with(&r.min_list, |a, &b| *a = F::min(*a, b));
        max_list.zip_mut_with(&r.max_list, |a, &b| *a = F::max(*a, b));
        if min_list != node.min_list || max_list != node.max_list {
            return broken("bounding box is not minimal");
        }

        let mass = self.check_subtree(left)? + self.check_subtree(right)?;
        if mass != node.mass {
            return broken("mass differs from the children's");
        }
        Ok(mass)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn sorted(points: Vec<Array1<f64>>) -> Vec<Vec<f64>> {
        let mut points: Vec<Vec<f64>> = points.into_iter().map(|p| p.to_vec()).collect();
        points.sort_by(|a, b| a.partial_cmp(b).unwrap());
        points
    }

    fn random_points(n: usize, seed: u64) -> Vec<Array1<f64>> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        (0..n)
            .map(|_| array![rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)])
            .collect()
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(0), 0.0);
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        assert!(average_path_length(256) > average_path_length(16));
    }

    #[test]
    fn test_insert_keeps_invariants() {
        let mut tree = RandomCutTree::new(42);
        for (i, p) in random_points(200, 1).iter().enumerate() {
            tree.insert(p);
            tree.check_invariants().unwrap();
            assert_eq!(tree.mass(), i + 1);
        }
        // n leaves, n - 1 cuts
        assert_eq!(tree.node_count(), 399);
    }

    #[test]
    fn test_duplicates_merge_into_one_leaf() {
        let mut tree = RandomCutTree::new(0);
        for _ in 0..5 {
            tree.insert(&array![3.0]);
        }
        assert_eq!(tree.node_count(), 1);
        assert_eq!(tree.mass(), 5);
        assert_eq!(tree.height(), 0);
        tree.delete(&array![3.0]).unwrap();
        assert_eq!(tree.mass(), 4);
        tree.check_invariants().unwrap();
    }

    #[test]
    fn test_delete_restores_contents() {
        let points = random_points(100, 2);
        let mut tree = RandomCutTree::new(9);
        for p in &points {
            tree.insert(p);
        }
        for p in points.iter().step_by(2) {
            tree.delete(p).unwrap();
            tree.check_invariants().unwrap();
        }
        let remaining: Vec<Array1<f64>> = points.iter().skip(1).step_by(2).cloned().collect();
        assert_eq!(sorted(tree.points()), sorted(remaining.clone()));

        for p in &remaining {
            tree.delete(p).unwrap();
        }
        assert!(tree.is_empty());
        assert_eq!(tree.node_count(), 0);

        // The arena is reused after emptying.
        tree.insert(&array![0.0, 0.0]);
        assert_eq!(tree.mass(), 1);
        assert!(tree.nodes.len() <= 199);
    }

    #[test]
    fn test_delete_unknown_point_fails() {
        let mut tree: RandomCutTree<f64> = RandomCutTree::new(0);
        assert!(matches!(
            tree.delete(&array![1.0]),
            Err(RcfError::TreeInvariant(_))
        ));
        tree.insert(&array![1.0]);
        tree.insert(&array![2.0]);
        assert!(tree.delete(&array![1.5]).is_err());
        assert_eq!(tree.mass(), 2);
    }

    #[test]
    fn test_same_seed_same_shape() {
        let points = random_points(50, 3);
        let mut a = RandomCutTree::new(5);
        let mut b = RandomCutTree::new(5);
        for p in &points {
            a.insert(p);
            b.insert(p);
        }
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn test_score_empty_and_duplicate() {
        let mut tree = RandomCutTree::new(0);
        assert_eq!(tree.score(&array![1.0], ScoringPolicy::Displacement), 0.0);
        assert_eq!(tree.score(&array![1.0], ScoringPolicy::Depth), 0.0);
        for _ in 0..3 {
            tree.insert(&array![1.0]);
        }
        assert_eq!(tree.score(&array![1.0], ScoringPolicy::Displacement), 0.0);
        assert_eq!(tree.score(&array![1.0], ScoringPolicy::Depth), 0.0);
        // Cut off at the root, displacing everything.
        assert_eq!(tree.score(&array![100.0], ScoringPolicy::Displacement), 1.0);
        // Isolated at depth 1 over a mass of 3.
        let expected = 2f64.powf(-1.0 / average_path_length(3));
        let depth_score = tree.score(&array![100.0], ScoringPolicy::Depth);
        assert!((depth_score - expected).abs() < 1e-12);
    }

    #[test]
    fn test_depth_ranks_duplicates_below_outliers() {
        let mut tree = RandomCutTree::new(3);
        tree.insert(&array![1.0]);
        let duplicate = tree.score(&array![1.0], ScoringPolicy::Depth);
        let outlier = tree.score(&array![100.0], ScoringPolicy::Depth);
        assert_eq!(duplicate, 0.0);
        assert_eq!(outlier, 0.5);

        for p in random_points(64, 7) {
            tree.insert(&array![p[0]]);
        }
        let held = tree.points()[0].clone();
        assert_eq!(tree.score(&held, ScoringPolicy::Depth), 0.0);
        assert!(tree.score(&array![100.0], ScoringPolicy::Depth) > 0.0);
    }

    #[test]
    fn test_score_outlier_beats_inlier() {
        let mut tree = RandomCutTree::new(4);
        for p in random_points(128, 5) {
            tree.insert(&p);
        }
        for policy in [ScoringPolicy::Displacement, ScoringPolicy::Depth] {
            let inlier = tree.score(&array![0.0, 0.0], policy);
            let outlier = tree.score(&array![8.0, -8.0], policy);
            assert!(outlier > inlier, "{policy:?}: {outlier} <= {inlier}");
            assert!(inlier >= 0.0);
        }
    }

    #[test]
    fn test_score_does_not_mutate() {
        let mut tree = RandomCutTree::new(6);
        for p in random_points(64, 6) {
            tree.insert(&p);
        }
        let before = tree.to_string();
        let x = array![0.3, 5.0];
        let first = tree.score(&x, ScoringPolicy::Displacement);
        let second = tree.score(&x, ScoringPolicy::Displacement);
        assert_eq!(first, second);
        assert_eq!(before, tree.to_string());
    }
}
