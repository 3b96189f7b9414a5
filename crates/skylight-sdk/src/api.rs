use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use skylight_proto::{
    AssignmentIdentity, AssignmentNew, CardIdentity, CardNew, SequenceIdentity, SequenceNew,
};
use tokio::sync::Mutex;

use crate::error::{SdkError, SdkResult};

/// Remote operations used to create an assignment piece by piece.
#[async_trait]
pub trait AssignmentApi: Send + Sync {
    async fn create_assignment(&self, assignment: &AssignmentNew) -> SdkResult<AssignmentIdentity>;

    async fn create_sequences(
        &self,
        assignment_id: &str,
        sequences: &[SequenceNew],
    ) -> SdkResult<Vec<SequenceIdentity>>;

    async fn create_sequence(
        &self,
        assignment_id: &str,
        sequence: &SequenceNew,
    ) -> SdkResult<SequenceIdentity>;

    async fn create_cards(
        &self,
        assignment_id: &str,
        sequence_id: &str,
        cards: &[CardNew],
    ) -> SdkResult<Vec<CardIdentity>>;
}

/// One request as seen by [`InMemoryAssignmentApi`].
#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    CreateAssignment(AssignmentNew),
    CreateSequences {
        assignment_id: String,
        sequences: Vec<SequenceNew>,
    },
    CreateSequence {
        assignment_id: String,
        sequence: SequenceNew,
    },
    CreateCards {
        assignment_id: String,
        sequence_id: String,
        cards: Vec<CardNew>,
    },
}

#[derive(Default)]
struct Recorded {
    calls: Vec<ApiCall>,
    next_assignment: usize,
}

/// In-memory adapter for tests and dry runs. Records every call and can be
/// told to reject specific requests.
#[derive(Default)]
pub struct InMemoryAssignmentApi {
    recorded: Mutex<Recorded>,
    failing_sequences: Mutex<HashSet<String>>,
    fail_assignments: Mutex<bool>,
}

impl InMemoryAssignmentApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn calls(&self) -> Vec<ApiCall> {
        self.recorded.lock().await.calls.clone()
    }

    /// Rejects any create-sequence or create-cards call naming `sequence_id`,
    /// and any create-sequences call containing it.
    pub async fn fail_sequence(&self, sequence_id: impl Into<String>) {
        self.failing_sequences.lock().await.insert(sequence_id.into());
    }

    pub async fn fail_assignments(&self) {
        *self.fail_assignments.lock().await = true;
    }

    async fn record(&self, call: ApiCall) {
        self.recorded.lock().await.calls.push(call);
    }

    async fn check_sequence(&self, sequence_id: &str) -> SdkResult<()> {
        if self.failing_sequences.lock().await.contains(sequence_id) {
            return Err(rejected(format!("sequence {sequence_id} rejected")));
        }
        Ok(())
    }
}

fn rejected(body: String) -> SdkError {
    SdkError::UnexpectedStatus {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body,
    }
}

#[async_trait]
impl AssignmentApi for InMemoryAssignmentApi {
    async fn create_assignment(&self, assignment: &AssignmentNew) -> SdkResult<AssignmentIdentity> {
        if *self.fail_assignments.lock().await {
            return Err(rejected("assignment rejected".into()));
        }
        let mut recorded = self.recorded.lock().await;
        recorded.next_assignment += 1;
        let id = format!("assignment-{}", recorded.next_assignment);
        recorded
            .calls
            .push(ApiCall::CreateAssignment(assignment.clone()));
        Ok(AssignmentIdentity { id })
    }

    async fn create_sequences(
        &self,
        assignment_id: &str,
        sequences: &[SequenceNew],
    ) -> SdkResult<Vec<SequenceIdentity>> {
        for sequence in sequences {
            self.check_sequence(&sequence.id).await?;
        }
        self.record(ApiCall::CreateSequences {
            assignment_id: assignment_id.to_string(),
            sequences: sequences.to_vec(),
        })
        .await;
        Ok(sequences
            .iter()
            .map(|sequence| SequenceIdentity {
                id: sequence.id.clone(),
            })
            .collect())
    }

    async fn create_sequence(
        &self,
        assignment_id: &str,
        sequence: &SequenceNew,
    ) -> SdkResult<SequenceIdentity> {
        self.check_sequence(&sequence.id).await?;
        self.record(ApiCall::CreateSequence {
            assignment_id: assignment_id.to_string(),
            sequence: sequence.clone(),
        })
        .await;
        Ok(SequenceIdentity {
            id: sequence.id.clone(),
        })
    }

    async fn create_cards(
        &self,
        assignment_id: &str,
        sequence_id: &str,
        cards: &[CardNew],
    ) -> SdkResult<Vec<CardIdentity>> {
        self.check_sequence(sequence_id).await?;
        self.record(ApiCall::CreateCards {
            assignment_id: assignment_id.to_string(),
            sequence_id: sequence_id.to_string(),
            cards: cards.to_vec(),
        })
        .await;
        Ok(cards
            .iter()
            .map(|card| CardIdentity {
                id: card.id.clone(),
            })
            .collect())
    }
}
