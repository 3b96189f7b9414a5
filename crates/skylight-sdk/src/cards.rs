use skylight_proto::CardNew;
use tracing::trace;

use crate::error::SplitError;
use crate::estimate::{PayloadBudget, PayloadSizeEstimator};

/// Breaks an oversized card list into create-cards batches by halving.
#[derive(Debug, Clone, Copy)]
pub struct CardBatchSplitter {
    budget: PayloadBudget,
    estimator: PayloadSizeEstimator,
}

impl CardBatchSplitter {
    pub fn new(budget: PayloadBudget, estimator: PayloadSizeEstimator) -> Self {
        Self { budget, estimator }
    }

    /// Splits `cards` into contiguous batches whose list bodies each fit the
    /// budget. Concatenating the batches gives back the input in order.
    ///
    /// A list that already fits is returned as one batch. Otherwise it is cut
    /// at the ceiling midpoint and each half is handled the same way. A single
    /// card that does not fit on its own is an error; nothing is sent for it.
    pub fn split(
        &self,
        sequence_id: &str,
        cards: Vec<CardNew>,
    ) -> Result<Vec<Vec<CardNew>>, SplitError> {
        let mut batches = Vec::new();
        if !cards.is_empty() {
            self.split_into(sequence_id, cards, &mut batches)?;
        }
        Ok(batches)
    }

    fn split_into(
        &self,
        sequence_id: &str,
        mut cards: Vec<CardNew>,
        batches: &mut Vec<Vec<CardNew>>,
    ) -> Result<(), SplitError> {
        let size = self.estimator.estimate(&cards);
        if self.budget.admits(size) {
            batches.push(cards);
            return Ok(());
        }
        if cards.len() == 1 {
            let card_id = cards.pop().map(|card| card.id).unwrap_or_default();
            return Err(SplitError::UnsplittableCard {
                sequence_id: sequence_id.to_string(),
                card_id,
                size,
                budget: self.budget.bytes(),
            });
        }

        let second = cards.split_off(cards.len().div_ceil(2));
        trace!(
            target = "skylight.split",
            sequence_id,
            size,
            first = cards.len(),
            second = second.len(),
            "halving card batch"
        );
        self.split_into(sequence_id, cards, batches)?;
        self.split_into(sequence_id, second, batches)
    }
}
