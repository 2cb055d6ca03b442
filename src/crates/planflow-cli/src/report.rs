//! Stdout reporter: prints node transitions as the status snapshot evolves

use chrono::Local;
use planflow_core::{NodeRecord, NodeStatus};
use std::collections::HashMap;

/// Tracks the last seen status per node and prints only changes.
#[derive(Debug, Default)]
pub struct StdoutReporter {
    last: HashMap<String, NodeStatus>,
}

impl StdoutReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Print every transition contained in a fresh status snapshot.
    pub fn report(&mut self, records: &[NodeRecord]) {
        for record in records {
            if record.kind != "playbook" {
                continue;
            }
            let changed = self
                .last
                .get(&record.id)
                .map(|prev| *prev != record.status)
                .unwrap_or(record.status != NodeStatus::NotStarted);
            if changed {
                self.last.insert(record.id.clone(), record.status);
                println!("{}", Self::line(record));
            }
        }
    }

    fn line(record: &NodeRecord) -> String {
        let stamp = Local::now().format("%H:%M:%S");
        let marker = match record.status {
            NodeStatus::NotStarted => " ",
            NodeStatus::PreRunning | NodeStatus::Running => ">",
            NodeStatus::Ended => "v",
            NodeStatus::Failed => "x",
            NodeStatus::Skipped => "-",
        };
        let label = record
            .name
            .clone()
            .or_else(|| record.playbook.clone())
            .unwrap_or_else(|| record.id.clone());
        format!(
            "{} [{}] {:<12} {} ({})",
            stamp, marker, record.status, record.id, label
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, status: NodeStatus) -> NodeRecord {
        NodeRecord {
            id: id.to_string(),
            kind: "playbook".to_string(),
            status,
            name: None,
            description: None,
            reference: None,
            playbook: Some("site.yml".to_string()),
            skipped: false,
            started_at: None,
            ended_at: None,
        }
    }

    #[test]
    fn reports_only_transitions() {
        let mut reporter = StdoutReporter::new();
        let snapshot = vec![record("p1", NodeStatus::Running)];
        reporter.report(&snapshot);
        assert_eq!(reporter.last.get("p1"), Some(&NodeStatus::Running));

        // unchanged snapshot leaves the state untouched
        reporter.report(&snapshot);
        assert_eq!(reporter.last.len(), 1);

        reporter.report(&[record("p1", NodeStatus::Ended)]);
        assert_eq!(reporter.last.get("p1"), Some(&NodeStatus::Ended));
    }

    #[test]
    fn blocks_are_not_reported() {
        let mut reporter = StdoutReporter::new();
        let mut block = record("b", NodeStatus::Ended);
        block.kind = "block".to_string();
        reporter.report(&[block]);
        assert!(reporter.last.is_empty());
    }

    #[test]
    fn line_carries_status_and_label() {
        let line = StdoutReporter::line(&record("p1", NodeStatus::Failed));
        assert!(line.contains("failed"));
        assert!(line.contains("p1"));
        assert!(line.contains("site.yml"));
    }
}
