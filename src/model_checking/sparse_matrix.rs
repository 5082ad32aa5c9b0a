use std::ops::Range;

use itertools::Itertools;

use super::bit_vector::BitVector;
use super::value_type::ValueType;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatrixEntry<V> {
    pub column: usize,
    pub value: V,
}

/// Compressed row storage where consecutive rows are grouped. For a Markov
/// automaton a row group is a state and each row one of its choices.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseMatrix<V> {
    entries: Vec<MatrixEntry<V>>,
    row_indications: Vec<usize>,
    row_group_indices: Vec<usize>,
    column_count: usize,
}

impl<V: ValueType> SparseMatrix<V> {
    /// Builds a matrix from `state -> choices -> (successor, probability)`.
    pub fn from_row_groups(groups: Vec<Vec<Vec<(usize, V)>>>) -> SparseMatrix<V> {
        let column_count = groups.len();
        let group_count = groups.len();
        let mut builder = SparseMatrixBuilder::new();
        let mut row: usize = 0;
        for choices in groups.into_iter() {
            builder.new_row_group(row);
            for choice in choices.into_iter() {
                for (column, value) in choice.into_iter() {
                    builder.add_next_value(row, column, value);
                }
                row += 1;
            }
        }
        builder.build(row, column_count, group_count)
    }

    pub fn row_count(&self) -> usize {
        self.row_indications.len() - 1
    }

    pub fn column_count(&self) -> usize {
        self.column_count
    }

    pub fn row_group_count(&self) -> usize {
        self.row_group_indices.len() - 1
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn row_group_indices(&self) -> &[usize] {
        &self.row_group_indices
    }

    pub fn row_group(&self, group: usize) -> Range<usize> {
        self.row_group_indices[group]..self.row_group_indices[group + 1]
    }

    pub fn row_group_size(&self, group: usize) -> usize {
        self.row_group_indices[group + 1] - self.row_group_indices[group]
    }

    pub fn has_trivial_row_grouping(&self) -> bool {
        self.row_group_count() == self.row_count()
            && (0..self.row_group_count()).all(|g| self.row_group_size(g) == 1)
    }

    pub fn row(&self, row: usize) -> &[MatrixEntry<V>] {
        &self.entries[self.row_indications[row]..self.row_indications[row + 1]]
    }

    pub fn row_mut(&mut self, row: usize) -> &mut [MatrixEntry<V>] {
        let (start, end) = (self.row_indications[row], self.row_indications[row + 1]);
        &mut self.entries[start..end]
    }

    pub fn row_sum(&self, row: usize) -> V {
        self.row(row).iter().map(|e| e.value).sum()
    }

    /// Row indices belonging to the selected row groups.
    pub fn row_filter(&self, group_constraint: &BitVector) -> BitVector {
        let mut rows = BitVector::new(self.row_count(), false);
        for group in group_constraint.iter() {
            for row in self.row_group(group) {
                rows.set(row, true);
            }
        }
        rows
    }

    /// Restricts the matrix to the given rows and columns and renumbers both.
    ///
    /// With `use_groups` the row constraint selects row groups, otherwise it
    /// selects single rows and groups left without any row disappear. With
    /// `insert_diagonal` every row of the i-th remaining group gets an entry
    /// in column i, zero if there was none.
    pub fn submatrix(
        &self,
        use_groups: bool,
        row_constraint: &BitVector,
        column_constraint: &BitVector,
        insert_diagonal: bool,
    ) -> SparseMatrix<V> {
        let column_map = column_constraint.compressed_indices();
        let new_column_count = column_constraint.number_of_set_bits();
        let mut builder = SparseMatrixBuilder::new();
        let mut new_row: usize = 0;
        let mut new_group: usize = 0;
        for group in 0..self.row_group_count() {
            let rows: Vec<usize> = if use_groups {
                if !row_constraint.get(group) {
                    continue;
                }
                self.row_group(group).collect()
            } else {
                let selected = self.row_group(group).filter(|r| row_constraint.get(*r)).collect_vec();
                if selected.is_empty() {
                    continue;
                }
                selected
            };
            builder.new_row_group(new_row);
            for row in rows {
                let mut has_diagonal = false;
                for entry in self.row(row) {
                    if let Some(column) = column_map[entry.column] {
                        has_diagonal |= column == new_group;
                        builder.add_next_value(new_row, column, entry.value);
                    }
                }
                if insert_diagonal && !has_diagonal && new_group < new_column_count {
                    builder.add_next_value(new_row, new_group, V::zero());
                }
                new_row += 1;
            }
            new_group += 1;
        }
        builder.build(new_row, new_column_count, new_group)
    }

    /// `result[row] = sum_j A[row][j] * x[j]` for every row.
    pub fn multiply_with_vector(&self, x: &[V], result: &mut [V]) {
        for (row, r) in result.iter_mut().enumerate().take(self.row_count()) {
            *r = self.multiply_row_with_vector(row, x);
        }
    }

    pub fn multiply_row_with_vector(&self, row: usize, x: &[V]) -> V {
        self.row(row).iter().map(|e| e.value * x[e.column]).sum()
    }

    /// Backward transitions: row `t` lists the states having a choice that
    /// reaches `t`, with the summed probability.
    pub fn transpose(&self) -> SparseMatrix<V> {
        let mut builder = SparseMatrixBuilder::new();
        let mut backward: Vec<Vec<(usize, V)>> = vec![Vec::new(); self.column_count];
        for group in 0..self.row_group_count() {
            for row in self.row_group(group) {
                for entry in self.row(row) {
                    backward[entry.column].push((group, entry.value));
                }
            }
        }
        for (row, predecessors) in backward.into_iter().enumerate() {
            for (column, value) in predecessors {
                builder.add_next_value(row, column, value);
            }
        }
        builder.build(self.column_count, self.row_group_count(), self.column_count)
    }

    pub fn constrained_row_sum(&self, row: usize, column_constraint: &BitVector) -> V {
        self.row(row)
            .iter()
            .filter(|e| column_constraint.get(e.column))
            .map(|e| e.value)
            .sum()
    }

    /// For every row of the selected groups, the probability mass moving into
    /// `column_constraint`.
    pub fn constrained_row_group_sum_vector(
        &self,
        row_group_constraint: &BitVector,
        column_constraint: &BitVector,
    ) -> Vec<V> {
        let mut result = Vec::new();
        for group in row_group_constraint.iter() {
            for row in self.row_group(group) {
                result.push(self.constrained_row_sum(row, column_constraint));
            }
        }
        result
    }
}

/// Collects entries row by row; rows are sorted and duplicate columns merged
/// when the matrix is built.
#[derive(Debug, Clone)]
pub struct SparseMatrixBuilder<V> {
    rows: Vec<Vec<MatrixEntry<V>>>,
    row_group_indices: Vec<usize>,
}

impl<V: ValueType> SparseMatrixBuilder<V> {
    pub fn new() -> SparseMatrixBuilder<V> {
        SparseMatrixBuilder { rows: Vec::new(), row_group_indices: Vec::new() }
    }

    pub fn new_row_group(&mut self, starting_row: usize) {
        self.row_group_indices.push(starting_row);
    }

    pub fn add_next_value(&mut self, row: usize, column: usize, value: V) {
        while self.rows.len() <= row {
            self.rows.push(Vec::new());
        }
        self.rows[row].push(MatrixEntry { column, value });
    }

    /// Without explicit row groups every row becomes its own group.
    pub fn build(self, row_count: usize, column_count: usize, row_group_count: usize) -> SparseMatrix<V> {
        let SparseMatrixBuilder { mut rows, mut row_group_indices } = self;
        while rows.len() < row_count {
            rows.push(Vec::new());
        }
        if row_group_indices.is_empty() {
            row_group_indices = (0..row_count).collect();
        }
        while row_group_indices.len() < row_group_count {
            row_group_indices.push(row_count);
        }
        row_group_indices.push(row_count);
        debug_assert_eq!(row_group_indices.len(), row_group_count + 1);

        let mut entries = Vec::new();
        let mut row_indications = Vec::with_capacity(row_count + 1);
        for mut row in rows.into_iter() {
            row_indications.push(entries.len());
            row.sort_by_key(|e| e.column);
            let mut merged: Vec<MatrixEntry<V>> = Vec::with_capacity(row.len());
            for entry in row {
                match merged.last_mut() {
                    Some(last) if last.column == entry.column => last.value += entry.value,
                    _ => merged.push(entry),
                }
            }
            entries.extend(merged);
        }
        row_indications.push(entries.len());

        SparseMatrix { entries, row_indications, row_group_indices, column_count }
    }
}

impl<V: ValueType> Default for SparseMatrixBuilder<V> {
    fn default() -> Self {
        SparseMatrixBuilder::new()
    }
}
