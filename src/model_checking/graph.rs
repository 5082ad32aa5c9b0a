//! Qualitative reachability over the transition graph: which states reach
//! `psi` (via `phi`) with probability 0 or 1 under all or some schedulers.
use std::collections::VecDeque;

use super::bit_vector::BitVector;
use super::sparse_matrix::SparseMatrix;
use super::value_type::ValueType;

fn predecessors<V: ValueType>(backward: &SparseMatrix<V>, state: usize) -> impl Iterator<Item = usize> + '_ {
    backward.row(state).iter().map(|e| e.column)
}

/// States reaching `psi` through `phi` with positive probability under some
/// scheduler.
pub fn perform_prob_greater0e<V: ValueType>(backward: &SparseMatrix<V>, phi: &BitVector, psi: &BitVector) -> BitVector {
    let mut result = psi.clone();
    let mut stack: VecDeque<usize> = psi.iter().collect();
    while let Some(state) = stack.pop_front() {
        for pred in predecessors(backward, state) {
            if phi.get(pred) && !result.get(pred) {
                result.set(pred, true);
                stack.push_back(pred);
            }
        }
    }
    result
}

/// States reaching `psi` through `phi` with positive probability under every
/// scheduler.
pub fn perform_prob_greater0a<V: ValueType>(
    matrix: &SparseMatrix<V>,
    backward: &SparseMatrix<V>,
    phi: &BitVector,
    psi: &BitVector,
) -> BitVector {
    let mut result = psi.clone();
    let mut stack: VecDeque<usize> = psi.iter().collect();
    while let Some(state) = stack.pop_front() {
        for pred in predecessors(backward, state) {
            if phi.get(pred) && !result.get(pred) {
                let every_choice_hits = matrix
                    .row_group(pred)
                    .all(|row| matrix.row(row).iter().any(|e| result.get(e.column)));
                if every_choice_hits {
                    result.set(pred, true);
                    stack.push_back(pred);
                }
            }
        }
    }
    result
}

/// States with probability 0 under all schedulers.
pub fn perform_prob0a<V: ValueType>(backward: &SparseMatrix<V>, phi: &BitVector, psi: &BitVector) -> BitVector {
    !perform_prob_greater0e(backward, phi, psi)
}

/// States with probability 0 under some scheduler.
pub fn perform_prob0e<V: ValueType>(
    matrix: &SparseMatrix<V>,
    backward: &SparseMatrix<V>,
    phi: &BitVector,
    psi: &BitVector,
) -> BitVector {
    !perform_prob_greater0a(matrix, backward, phi, psi)
}

/// States with probability 1 under all schedulers: those that cannot move
/// (before `psi`) into a state where some scheduler avoids `psi` surely.
pub fn perform_prob1a<V: ValueType>(
    matrix: &SparseMatrix<V>,
    backward: &SparseMatrix<V>,
    phi: &BitVector,
    psi: &BitVector,
) -> BitVector {
    let prob0e = perform_prob0e(matrix, backward, phi, psi);
    !perform_prob_greater0e(backward, &phi.and_not(psi), &prob0e)
}

/// States with probability 1 under some scheduler.
pub fn perform_prob1e<V: ValueType>(
    matrix: &SparseMatrix<V>,
    backward: &SparseMatrix<V>,
    phi: &BitVector,
    psi: &BitVector,
) -> BitVector {
    let mut current = BitVector::new(matrix.row_group_count(), true);
    loop {
        let mut next = psi.clone();
        let mut stack: VecDeque<usize> = psi.iter().collect();
        while let Some(state) = stack.pop_front() {
            for pred in predecessors(backward, state) {
                if phi.get(pred) && !next.get(pred) {
                    let has_choice = matrix.row_group(pred).any(|row| {
                        let entries = matrix.row(row);
                        entries.iter().all(|e| current.get(e.column))
                            && entries.iter().any(|e| next.get(e.column))
                    });
                    if has_choice {
                        next.set(pred, true);
                        stack.push_back(pred);
                    }
                }
            }
        }
        if next == current {
            return current;
        }
        current = next;
    }
}

/// `(prob0, prob1)` for maximal reachability probabilities.
pub fn perform_prob01_max<V: ValueType>(
    matrix: &SparseMatrix<V>,
    backward: &SparseMatrix<V>,
    phi: &BitVector,
    psi: &BitVector,
) -> (BitVector, BitVector) {
    (perform_prob0a(backward, phi, psi), perform_prob1e(matrix, backward, phi, psi))
}

/// `(prob0, prob1)` for minimal reachability probabilities.
pub fn perform_prob01_min<V: ValueType>(
    matrix: &SparseMatrix<V>,
    backward: &SparseMatrix<V>,
    phi: &BitVector,
    psi: &BitVector,
) -> (BitVector, BitVector) {
    (perform_prob0e(matrix, backward, phi, psi), perform_prob1a(matrix, backward, phi, psi))
}
