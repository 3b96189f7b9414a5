use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use skylight_bus::LocalBroker;
use skylight_proto::AssignmentNew;
use skylight_sdk::{
    ApiClient, Credentials, Manager, PayloadBudget, PayloadSizeEstimator, SubmissionPlan,
};
use tracing::info;

use crate::config::ToolConfig;

#[derive(Parser, Debug)]
#[command(name = "skytool")]
#[command(about = "Plan, submit and remove Skylight assignments")]
pub struct Cli {
    /// Credentials file (id, username, password, domain, apiUrl, mqttUrl)
    #[arg(long, global = true, env = "SKYLIGHT_CREDENTIALS")]
    pub credentials: Option<PathBuf>,

    /// Largest estimated request body, in bytes
    #[arg(long, global = true, env = "SKYLIGHT_MAX_PAYLOAD_BYTES")]
    pub max_payload_bytes: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show how an assignment document would be split, without sending it
    Plan {
        /// Assignment document (JSON)
        file: PathBuf,
    },

    /// Create an assignment from a JSON document
    Submit {
        /// Assignment document (JSON)
        file: PathBuf,

        /// Concurrent requests allowed while distributing sequences
        #[arg(long)]
        max_in_flight: Option<usize>,
    },

    /// Delete an assignment
    Delete {
        /// Assignment id
        id: String,

        /// Remove outright instead of archiving
        #[arg(long)]
        purge: bool,
    },
}

impl Cli {
    fn credentials_path(&self, cfg: &ToolConfig) -> PathBuf {
        self.credentials
            .clone()
            .unwrap_or_else(|| PathBuf::from(&cfg.credentials_path))
    }

    fn budget(&self, cfg: &ToolConfig) -> Result<PayloadBudget> {
        match self.max_payload_bytes.or(cfg.max_payload_bytes) {
            Some(bytes) => Ok(PayloadBudget::new(bytes)?),
            None => Ok(PayloadBudget::default()),
        }
    }
}

pub async fn run(cli: Cli, cfg: ToolConfig) -> Result<()> {
    match &cli.command {
        Commands::Plan { file } => {
            let assignment = read_assignment(file)?;
            let plan = SubmissionPlan::build(
                assignment,
                cli.budget(&cfg)?,
                PayloadSizeEstimator::default(),
            )?;
            print!("{}", describe_plan(&plan));
            Ok(())
        }
        Commands::Submit {
            file,
            max_in_flight,
        } => {
            let assignment = read_assignment(file)?;
            let credentials = load_credentials(&cli.credentials_path(&cfg))?;
            let manager = Manager::new(credentials, Arc::new(LocalBroker::new()));
            manager.set_max_payload_bytes(cli.budget(&cfg)?.bytes())?;
            if let Some(n) = max_in_flight.or(cfg.max_in_flight) {
                manager.set_max_in_flight(n)?;
            }
            let identity = manager.submit_assignment(assignment).await?;
            info!(assignment_id = %identity.id, "assignment submitted");
            println!("{}", identity.id);
            Ok(())
        }
        Commands::Delete { id, purge } => {
            let credentials = load_credentials(&cli.credentials_path(&cfg))?;
            ApiClient::from_credentials(&credentials)
                .delete_assignment(id, *purge)
                .await?;
            info!(assignment_id = %id, purge, "assignment deleted");
            Ok(())
        }
    }
}

fn load_credentials(path: &Path) -> Result<Credentials> {
    Credentials::load(path)
        .with_context(|| format!("failed to load credentials from {}", path.display()))
}

fn read_assignment(path: &Path) -> Result<AssignmentNew> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} is not an assignment", path.display()))
}

pub fn describe_plan(plan: &SubmissionPlan) -> String {
    let estimator = PayloadSizeEstimator::default();
    let mut out = String::new();
    match plan {
        SubmissionPlan::Single(assignment) => {
            out.push_str(&format!(
                "single request: {} ({} bytes, {} sequences, {} cards)\n",
                assignment.name,
                estimator.estimate(assignment),
                assignment.sequences.len(),
                assignment.card_count()
            ));
        }
        SubmissionPlan::Split(split) => {
            out.push_str(&format!(
                "assignment shell: {} ({} bytes)\n",
                split.shell.name,
                estimator.estimate(&split.shell)
            ));
            for (index, group) in split.sequence_groups.iter().enumerate() {
                let ids: Vec<&str> = group.iter().map(|s| s.id.as_str()).collect();
                out.push_str(&format!(
                    "sequence group {}: {} ({} bytes)\n",
                    index + 1,
                    ids.join(", "),
                    estimator.estimate(group)
                ));
            }
            for overflow in &split.overflow {
                out.push_str(&format!("overflow sequence: {}\n", overflow.shell.id));
                for (index, batch) in overflow.card_batches.iter().enumerate() {
                    out.push_str(&format!(
                        "  card batch {}: {} cards ({} bytes)\n",
                        index + 1,
                        batch.len(),
                        estimator.estimate(batch)
                    ));
                }
            }
        }
    }
    out.push_str(&format!("requests: {}\n", plan.call_count()));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use skylight_proto::{CardNew, SequenceNew};

    #[test]
    fn describes_split_plan() {
        let mut assignment = AssignmentNew::new("Inspection", "root");
        let root = assignment.add_sequence(SequenceNew::new("root"));
        for i in 0..20 {
            root.add_card(CardNew::new(format!("card{i:02}"), "x".repeat(60)));
        }
        assignment
            .add_sequence(SequenceNew::new("notes"))
            .add_card(CardNew::new("note", "short"));

        let plan = SubmissionPlan::build(
            assignment,
            PayloadBudget::new(3000).expect("budget"),
            PayloadSizeEstimator::default(),
        )
        .expect("plan");
        let text = describe_plan(&plan);
        assert!(text.starts_with("assignment shell: Inspection"));
        assert!(text.contains("sequence group 1: notes"));
        assert!(text.contains("overflow sequence: root"));
        assert!(text.contains("card batch 2"));
    }

    #[test]
    fn cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "skytool",
            "delete",
            "assignment-1",
            "--purge",
            "--credentials",
            "creds.json",
        ])
        .expect("parse");
        assert_eq!(cli.credentials, Some(PathBuf::from("creds.json")));
        assert!(matches!(
            cli.command,
            Commands::Delete { ref id, purge: true } if id == "assignment-1"
        ));
    }

    #[test]
    fn reads_assignment_documents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("assignment.json");
        std::fs::write(
            &path,
            r#"{"name":"Checklist","rootSequence":"root","sequences":[{"id":"root","cards":[]}]}"#,
        )
        .expect("write");
        let assignment = read_assignment(&path).expect("read");
        assert_eq!(assignment.sequences.len(), 1);

        std::fs::write(&path, "[]").expect("write");
        assert!(read_assignment(&path).is_err());
    }
}
