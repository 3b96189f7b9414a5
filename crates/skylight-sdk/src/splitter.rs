use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use skylight_proto::{AssignmentIdentity, AssignmentNew, SequenceNew};
use tracing::{debug, info};

use crate::api::AssignmentApi;
use crate::dispatch::RequestDispatcher;
use crate::error::SdkResult;
use crate::estimate::{PayloadBudget, PayloadSizeEstimator};
use crate::plan::{OverflowSequence, SubmissionPlan};

/// Submits assignments of any size, splitting them into requests that each
/// stay under the payload budget.
pub struct AssignmentSplitter<A: AssignmentApi + ?Sized> {
    api: Arc<A>,
    budget: PayloadBudget,
    estimator: PayloadSizeEstimator,
    dispatcher: RequestDispatcher,
}

impl<A: AssignmentApi + ?Sized> AssignmentSplitter<A> {
    pub fn new(api: Arc<A>, budget: PayloadBudget) -> Self {
        Self {
            api,
            budget,
            estimator: PayloadSizeEstimator::default(),
            dispatcher: RequestDispatcher::default(),
        }
    }

    pub fn with_estimator(mut self, estimator: PayloadSizeEstimator) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: RequestDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn plan(&self, assignment: AssignmentNew) -> SdkResult<SubmissionPlan> {
        Ok(SubmissionPlan::build(assignment, self.budget, self.estimator)?)
    }

    /// Creates `assignment` and everything in it.
    ///
    /// A split submission creates the shell first; if that fails nothing else
    /// is sent. Group and overflow branches then run concurrently, and a
    /// failure in one is reported without undoing the others.
    pub async fn submit(&self, assignment: AssignmentNew) -> SdkResult<AssignmentIdentity> {
        match self.plan(assignment)? {
            SubmissionPlan::Single(assignment) => {
                let identity = self
                    .dispatcher
                    .call(self.api.create_assignment(&assignment))
                    .await?;
                info!(
                    target = "skylight.split",
                    assignment_id = %identity.id,
                    "assignment created in one request"
                );
                Ok(identity)
            }
            SubmissionPlan::Split(plan) => {
                let identity = self
                    .dispatcher
                    .call(self.api.create_assignment(&plan.shell))
                    .await?;
                info!(
                    target = "skylight.split",
                    assignment_id = %identity.id,
                    groups = plan.sequence_groups.len(),
                    overflow = plan.overflow.len(),
                    "assignment shell created, distributing sequences"
                );
                self.distribute(&identity.id, plan.sequence_groups, plan.overflow)
                    .await?;
                Ok(identity)
            }
        }
    }

    async fn distribute(
        &self,
        assignment_id: &str,
        groups: Vec<Vec<SequenceNew>>,
        overflow: Vec<OverflowSequence>,
    ) -> SdkResult<()> {
        let mut branches: Vec<BoxFuture<'_, SdkResult<()>>> =
            Vec::with_capacity(groups.len() + overflow.len());
        for group in groups {
            branches.push(
                async move {
                    self.dispatcher
                        .call(self.api.create_sequences(assignment_id, &group))
                        .await
                        .map(drop)
                }
                .boxed(),
            );
        }
        for sequence in overflow {
            branches.push(self.create_overflow_sequence(assignment_id, sequence).boxed());
        }
        self.dispatcher.join_all(branches).await
    }

    /// Creates the empty sequence, then fills it. Card batches are only sent
    /// once the sequence exists.
    async fn create_overflow_sequence(
        &self,
        assignment_id: &str,
        sequence: OverflowSequence,
    ) -> SdkResult<()> {
        let OverflowSequence {
            shell,
            card_batches,
        } = sequence;
        self.dispatcher
            .call(self.api.create_sequence(assignment_id, &shell))
            .await?;
        debug!(
            target = "skylight.split",
            assignment_id,
            sequence_id = %shell.id,
            batches = card_batches.len(),
            "overflow sequence created"
        );
        let sequence_id = shell.id.as_str();
        let batches = card_batches.into_iter().map(|batch| async move {
            self.dispatcher
                .call(self.api.create_cards(assignment_id, sequence_id, &batch))
                .await
                .map(drop)
        });
        self.dispatcher.join_all(batches).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiCall, InMemoryAssignmentApi};
    use crate::error::SdkError;
    use skylight_proto::CardNew;

    fn sequence(id: &str, cards: usize, label_len: usize) -> SequenceNew {
        let mut sequence = SequenceNew::new(id);
        for i in 0..cards {
            sequence.add_card(CardNew::new(format!("{id}-card{i:02}"), "x".repeat(label_len)));
        }
        sequence
    }

    fn assignment(sequences: Vec<SequenceNew>) -> AssignmentNew {
        let mut assignment = AssignmentNew::new("Inspection", "s0");
        assignment.sequences = sequences;
        assignment
    }

    fn splitter(api: Arc<InMemoryAssignmentApi>, budget: usize) -> AssignmentSplitter<InMemoryAssignmentApi> {
        AssignmentSplitter::new(api, PayloadBudget::new(budget).expect("budget"))
    }

    #[tokio::test]
    async fn small_assignment_is_one_request() {
        let api = InMemoryAssignmentApi::new();
        let doc = assignment(vec![sequence("s0", 2, 10)]);
        let identity = splitter(api.clone(), 100_000)
            .submit(doc.clone())
            .await
            .expect("submit");

        assert_eq!(identity.id, "assignment-1");
        assert_eq!(api.calls().await, vec![ApiCall::CreateAssignment(doc)]);
    }

    #[tokio::test]
    async fn shell_goes_first_and_children_target_its_id() {
        let api = InMemoryAssignmentApi::new();
        let doc = assignment(vec![sequence("s0", 3, 50), sequence("s1", 40, 60)]);
        let identity = splitter(api.clone(), 3000)
            .submit(doc)
            .await
            .expect("submit");

        let calls = api.calls().await;
        match &calls[0] {
            ApiCall::CreateAssignment(shell) => assert!(shell.sequences.is_empty()),
            other => panic!("shell must be created first, got {other:?}"),
        }
        for call in &calls[1..] {
            let target = match call {
                ApiCall::CreateSequences { assignment_id, .. }
                | ApiCall::CreateSequence { assignment_id, .. }
                | ApiCall::CreateCards { assignment_id, .. } => assignment_id,
                ApiCall::CreateAssignment(_) => panic!("only one assignment call expected"),
            };
            assert_eq!(target, &identity.id);
        }
    }

    #[tokio::test]
    async fn card_batches_follow_their_sequence() {
        let api = InMemoryAssignmentApi::new();
        let doc = assignment(vec![sequence("s1", 40, 60)]);
        splitter(api.clone(), 3000).submit(doc).await.expect("submit");

        let calls = api.calls().await;
        let created_at = calls
            .iter()
            .position(|call| matches!(call, ApiCall::CreateSequence { sequence, .. } if sequence.id == "s1"))
            .expect("sequence created");
        let first_cards = calls
            .iter()
            .position(|call| matches!(call, ApiCall::CreateCards { .. }))
            .expect("cards created");
        assert!(created_at < first_cards);
    }

    #[tokio::test]
    async fn failed_shell_sends_nothing_else() {
        let api = InMemoryAssignmentApi::new();
        api.fail_assignments().await;
        let doc = assignment(vec![sequence("s0", 3, 50), sequence("s1", 40, 60)]);
        let err = splitter(api.clone(), 3000)
            .submit(doc)
            .await
            .expect_err("shell rejected");
        assert!(matches!(err, SdkError::UnexpectedStatus { .. }));
        assert!(api.calls().await.is_empty());
    }

    #[tokio::test]
    async fn unsplittable_card_fails_before_any_request() {
        let api = InMemoryAssignmentApi::new();
        let mut huge = sequence("s1", 1, 10);
        huge.add_card(CardNew::new("huge", "z".repeat(5000)));
        let err = splitter(api.clone(), 2000)
            .submit(assignment(vec![huge]))
            .await
            .expect_err("unsplittable");
        assert!(err.is_unsplittable());
        assert!(api.calls().await.is_empty());
    }

    #[tokio::test]
    async fn failed_overflow_branch_does_not_stop_siblings() {
        let api = InMemoryAssignmentApi::new();
        api.fail_sequence("s1").await;
        let doc = assignment(vec![
            sequence("s0", 3, 50),
            sequence("s1", 40, 60),
            sequence("s2", 40, 60),
        ]);
        let err = splitter(api.clone(), 3000)
            .submit(doc)
            .await
            .expect_err("s1 rejected");
        assert_eq!(err.failures().len(), 1);

        let calls = api.calls().await;
        assert!(calls.iter().any(|call| matches!(
            call,
            ApiCall::CreateCards { sequence_id, .. } if sequence_id == "s2"
        )));
        assert!(calls.iter().any(|call| matches!(
            call,
            ApiCall::CreateSequences { sequences, .. } if sequences.iter().any(|s| s.id == "s0")
        )));
    }
}
