use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use log::debug;
use petgraph::algo::kosaraju_scc;
use petgraph::graph::NodeIndex;
use petgraph::Graph;

use super::bit_vector::BitVector;
use super::sparse_matrix::SparseMatrix;
use super::value_type::ValueType;

/// States of one end component, each with the global indices of the choices
/// that stay inside it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MaximalEndComponent {
    states_and_choices: BTreeMap<usize, BTreeSet<usize>>,
}

impl MaximalEndComponent {
    pub fn new() -> Self {
        MaximalEndComponent { states_and_choices: BTreeMap::new() }
    }

    pub fn add_state(&mut self, state: usize, choices: BTreeSet<usize>) {
        self.states_and_choices.insert(state, choices);
    }

    pub fn size(&self) -> usize {
        self.states_and_choices.len()
    }

    pub fn contains_state(&self, state: usize) -> bool {
        self.states_and_choices.contains_key(&state)
    }

    pub fn choices(&self, state: usize) -> Option<&BTreeSet<usize>> {
        self.states_and_choices.get(&state)
    }

    pub fn states(&self) -> impl Iterator<Item = usize> + '_ {
        self.states_and_choices.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &BTreeSet<usize>)> + '_ {
        self.states_and_choices.iter().map(|(s, c)| (*s, c))
    }

    pub fn state_set(&self, state_count: usize) -> BitVector {
        BitVector::from_indices(state_count, self.states())
    }

    pub fn choice_set(&self, choice_count: usize) -> BitVector {
        BitVector::from_indices(choice_count, self.states_and_choices.values().flatten().copied())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MaximalEndComponentDecomposition {
    pub mecs: Vec<MaximalEndComponent>,
}

impl MaximalEndComponentDecomposition {
    pub fn new<V: ValueType>(matrix: &SparseMatrix<V>, backward: &SparseMatrix<V>) -> Self {
        let states = BitVector::new(matrix.row_group_count(), true);
        let choices = BitVector::new(matrix.row_count(), true);
        Self::with_restriction(matrix, backward, &states, &choices)
    }

    /// End components of the sub-model made of `states` and those of their
    /// `choices` that do not leave `states`.
    ///
    /// SCCs are computed on the remaining graph, choices leaving their SCC are
    /// dropped, states left without a choice are removed together with every
    /// choice leading into them, and this repeats until nothing changes.
    pub fn with_restriction<V: ValueType>(
        matrix: &SparseMatrix<V>,
        backward: &SparseMatrix<V>,
        states: &BitVector,
        choices: &BitVector,
    ) -> Self {
        let mut remaining = states.clone();
        let mut enabled: Vec<BTreeSet<usize>> = (0..matrix.row_group_count())
            .map(|s| {
                if states.get(s) {
                    matrix.row_group(s).filter(|c| choices.get(*c)).collect()
                } else {
                    BTreeSet::new()
                }
            })
            .collect();

        let mut scc_of: Vec<usize> = vec![usize::MAX; matrix.row_group_count()];
        let mut changed = true;
        while changed {
            changed = false;

            let mut g: Graph<usize, ()> = Graph::new();
            let mut node_of: HashMap<usize, NodeIndex> = HashMap::new();
            for s in remaining.iter() {
                node_of.insert(s, g.add_node(s));
            }
            for s in remaining.iter() {
                for c in enabled[s].iter() {
                    for e in matrix.row(*c) {
                        if let Some(t) = node_of.get(&e.column) {
                            g.update_edge(node_of[&s], *t, ());
                        }
                    }
                }
            }
            let sccs: Vec<Vec<NodeIndex>> = kosaraju_scc(&g);
            for (i, scc) in sccs.iter().enumerate() {
                for ni in scc.iter() {
                    scc_of[g[*ni]] = i;
                }
            }

            let mut removed: VecDeque<usize> = VecDeque::new();
            for s in remaining.iter() {
                let before = enabled[s].len();
                let scc = scc_of[s];
                enabled[s].retain(|c| {
                    matrix
                        .row(*c)
                        .iter()
                        .all(|e| remaining.get(e.column) && scc_of[e.column] == scc)
                });
                if enabled[s].len() != before {
                    changed = true;
                }
                if enabled[s].is_empty() {
                    removed.push_back(s);
                }
            }

            while let Some(s) = removed.pop_front() {
                if !remaining.get(s) {
                    continue;
                }
                remaining.set(s, false);
                changed = true;
                for pred in backward.row(s).iter().map(|e| e.column) {
                    if !remaining.get(pred) || enabled[pred].is_empty() {
                        continue;
                    }
                    enabled[pred].retain(|c| matrix.row(*c).iter().all(|e| e.column != s));
                    if enabled[pred].is_empty() {
                        removed.push_back(pred);
                    }
                }
            }
        }

        let mut by_scc: BTreeMap<usize, MaximalEndComponent> = BTreeMap::new();
        for s in remaining.iter() {
            by_scc
                .entry(scc_of[s])
                .or_insert_with(MaximalEndComponent::new)
                .add_state(s, enabled[s].clone());
        }
        let mut mecs: Vec<MaximalEndComponent> = by_scc.into_iter().map(|(_, mec)| mec).collect();
        mecs.sort_by_key(|mec| mec.states().next());
        debug!("found {} maximal end components", mecs.len());
        MaximalEndComponentDecomposition { mecs }
    }

    pub fn len(&self) -> usize {
        self.mecs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mecs.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MaximalEndComponent> {
        self.mecs.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 0: a -> {0, 1}, b -> 2
    // 1: -> 0
    // 2: a -> 3, b -> 2
    // 3: -> 4
    // 4: -> 4
    fn model() -> SparseMatrix<f64> {
        SparseMatrix::from_row_groups(vec![
            vec![vec![(0, 0.5), (1, 0.5)], vec![(2, 1.0)]],
            vec![vec![(0, 1.0)]],
            vec![vec![(3, 1.0)], vec![(2, 1.0)]],
            vec![vec![(4, 1.0)]],
            vec![vec![(4, 1.0)]],
        ])
    }

    #[test]
    fn decomposition() {
        let m = model();
        let d = MaximalEndComponentDecomposition::new(&m, &m.transpose());
        assert_eq!(d.len(), 3);
        let first = &d.mecs[0];
        itertools::assert_equal(first.states(), vec![0, 1]);
        itertools::assert_equal(first.choices(0).unwrap().iter().copied(), vec![0]);
        itertools::assert_equal(d.mecs[1].states(), vec![2]);
        itertools::assert_equal(d.mecs[1].choices(2).unwrap().iter().copied(), vec![4]);
        itertools::assert_equal(d.mecs[2].states(), vec![4]);
        assert!(!d.iter().any(|mec| mec.contains_state(3)));
    }

    #[test]
    fn removal_propagates_backwards() {
        // 0 <-> 1 only through 1's choice that may also reach 2, which has no
        // choice of its own inside the restriction
        let m = SparseMatrix::from_row_groups(vec![
            vec![vec![(1, 1.0)]],
            vec![vec![(0, 0.5), (2, 0.5)]],
            vec![vec![(2, 1.0)]],
        ]);
        let states = BitVector::from_indices(3, vec![0, 1, 2]);
        let choices = BitVector::from_indices(3, vec![0, 1]);
        let d = MaximalEndComponentDecomposition::with_restriction(&m, &m.transpose(), &states, &choices);
        assert!(d.is_empty());
    }

    #[test]
    fn sets() {
        let m = model();
        let d = MaximalEndComponentDecomposition::new(&m, &m.transpose());
        itertools::assert_equal(d.mecs[0].state_set(5).iter(), vec![0, 1]);
        itertools::assert_equal(d.mecs[0].choice_set(m.row_count()).iter(), vec![0, 2]);
    }
}
