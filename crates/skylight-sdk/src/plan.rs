//! Pure decomposition of an assignment into the calls that will create it.
//!
//! Planning never touches the network, so a document that cannot be split is
//! rejected before any request is made.

use skylight_proto::{AssignmentNew, CardNew, SequenceNew};
use tracing::debug;

use crate::cards::CardBatchSplitter;
use crate::error::SplitError;
use crate::estimate::{PayloadBudget, PayloadSizeEstimator};
use crate::grouping::SequenceGrouper;

#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionPlan {
    /// The whole document fits one create-assignment call.
    Single(AssignmentNew),
    Split(SplitPlan),
}

/// Shell first, then every group and overflow sequence concurrently.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitPlan {
    pub shell: AssignmentNew,
    pub sequence_groups: Vec<Vec<SequenceNew>>,
    pub overflow: Vec<OverflowSequence>,
}

/// A sequence too large for a create-sequences call: created empty, then
/// filled with card batches.
#[derive(Debug, Clone, PartialEq)]
pub struct OverflowSequence {
    pub shell: SequenceNew,
    pub card_batches: Vec<Vec<CardNew>>,
}

impl SubmissionPlan {
    pub fn build(
        assignment: AssignmentNew,
        budget: PayloadBudget,
        estimator: PayloadSizeEstimator,
    ) -> Result<Self, SplitError> {
        let size = estimator.estimate(&assignment);
        if budget.admits(size) {
            debug!(
                target = "skylight.split",
                size,
                budget = budget.bytes(),
                "assignment fits a single request"
            );
            return Ok(SubmissionPlan::Single(assignment));
        }

        let mut shell = assignment;
        let sequences = shell.take_sequences();
        let shell_size = estimator.estimate(&shell);
        if !budget.admits(shell_size) {
            return Err(SplitError::OversizedShell {
                kind: "assignment",
                id: shell.name.clone(),
                size: shell_size,
                budget: budget.bytes(),
            });
        }

        let grouper = SequenceGrouper::new(budget, estimator);
        let card_splitter = CardBatchSplitter::new(budget, estimator);
        let (fits, oversized): (Vec<_>, Vec<_>) = sequences
            .into_iter()
            .partition(|sequence| budget.admits(grouper.single_size(sequence)));

        let mut overflow = Vec::with_capacity(oversized.len());
        for mut sequence in oversized {
            let cards = sequence.take_cards();
            let shell_size = estimator.estimate(&sequence);
            if !budget.admits(shell_size) {
                return Err(SplitError::OversizedShell {
                    kind: "sequence",
                    id: sequence.id,
                    size: shell_size,
                    budget: budget.bytes(),
                });
            }
            let card_batches = card_splitter.split(&sequence.id, cards)?;
            overflow.push(OverflowSequence {
                shell: sequence,
                card_batches,
            });
        }

        let sequence_groups = grouper.group(fits);
        debug!(
            target = "skylight.split",
            size,
            budget = budget.bytes(),
            groups = sequence_groups.len(),
            overflow = overflow.len(),
            "assignment split"
        );
        Ok(SubmissionPlan::Split(SplitPlan {
            shell,
            sequence_groups,
            overflow,
        }))
    }

    /// Number of remote calls the plan issues.
    pub fn call_count(&self) -> usize {
        match self {
            SubmissionPlan::Single(_) => 1,
            SubmissionPlan::Split(plan) => {
                1 + plan.sequence_groups.len()
                    + plan
                        .overflow
                        .iter()
                        .map(|sequence| 1 + sequence.card_batches.len())
                        .sum::<usize>()
            }
        }
    }
}
