use skylight_proto::SequenceNew;

use crate::estimate::{PayloadBudget, PayloadSizeEstimator};

/// Packs sequences into as few create-sequences calls as it reasonably can
/// using first-fit decreasing.
#[derive(Debug, Clone, Copy)]
pub struct SequenceGrouper {
    budget: PayloadBudget,
    estimator: PayloadSizeEstimator,
}

struct Bin {
    sequences: Vec<SequenceNew>,
    list_size: usize,
}

impl SequenceGrouper {
    pub fn new(budget: PayloadBudget, estimator: PayloadSizeEstimator) -> Self {
        Self { budget, estimator }
    }

    /// Estimated body of a create-sequences call carrying only `sequence`.
    pub fn single_size(&self, sequence: &SequenceNew) -> usize {
        self.estimator.list_size([self.estimator.estimate(sequence)])
    }

    /// Groups `sequences` so every group's list body stays under the budget.
    ///
    /// Sequences are visited largest first (ties keep input order) and each
    /// goes into the first group it fits. Callers pass only sequences that
    /// fit on their own; one that does not still ends up alone in its group.
    pub fn group(&self, sequences: Vec<SequenceNew>) -> Vec<Vec<SequenceNew>> {
        let width = self.estimator.bytes_per_char();
        let mut sized: Vec<(usize, SequenceNew)> = sequences
            .into_iter()
            .map(|sequence| (self.estimator.estimate(&sequence), sequence))
            .collect();
        sized.sort_by(|a, b| b.0.cmp(&a.0));

        let mut bins: Vec<Bin> = Vec::new();
        for (size, sequence) in sized {
            let slot = bins.iter().position(|bin| {
                self.budget
                    .admits(bin.list_size.saturating_add(width).saturating_add(size))
            });
            match slot {
                Some(index) => {
                    let bin = &mut bins[index];
                    bin.list_size = bin.list_size.saturating_add(width).saturating_add(size);
                    bin.sequences.push(sequence);
                }
                None => bins.push(Bin {
                    list_size: self.estimator.list_size([size]),
                    sequences: vec![sequence],
                }),
            }
        }
        bins.into_iter().map(|bin| bin.sequences).collect()
    }
}
