use std::collections::HashMap;

use chrono::{DateTime, Utc};
use quorum_models::command::{CommandExecution, CommandOutcome, CommandStatus};
use quorum_models::message::ResponseBody;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Result of offering a response or failure to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Stored. `latency_ms` is measured from command start.
    Recorded { latency_ms: u64 },
    /// No live record matches the referenced message id.
    Unknown,
    /// The sender is not the agent that message was dispatched to.
    Mismatch,
    /// The record already reached a terminal state.
    Late,
    /// This agent has already settled.
    Duplicate,
}

struct Slot {
    record: CommandExecution,
    done: Option<oneshot::Sender<()>>,
    /// The caller has received its outcome.
    delivered: bool,
}

/// Live command executions plus an index from dispatched message id to command id.
#[derive(Default)]
pub struct ExecutionTable {
    slots: HashMap<Uuid, Slot>,
    routes: HashMap<Uuid, Uuid>,
}

impl ExecutionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track an executing record. `done` fires once every target has settled.
    pub fn insert(&mut self, record: CommandExecution, done: oneshot::Sender<()>) {
        for message_id in record.dispatched.values() {
            self.routes.insert(*message_id, record.id);
        }
        self.slots.insert(
            record.id,
            Slot {
                record,
                done: Some(done),
                delivered: false,
            },
        );
    }

    pub fn get(&self, command_id: &Uuid) -> Option<&CommandExecution> {
        self.slots.get(command_id).map(|slot| &slot.record)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Records not yet in a terminal state.
    pub fn active_count(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| !slot.record.status.is_terminal())
            .count()
    }

    /// Match a response by the id of the message it answers and its sender.
    pub fn apply_response(
        &mut self,
        original_id: Uuid,
        agent_id: &str,
        body: ResponseBody,
        now: DateTime<Utc>,
    ) -> Applied {
        let Some(command_id) = self.routes.get(&original_id).copied() else {
            return Applied::Unknown;
        };
        let Some(slot) = self.slots.get_mut(&command_id) else {
            return Applied::Unknown;
        };
        if slot.record.dispatched.get(agent_id) != Some(&original_id) {
            return Applied::Mismatch;
        }
        if slot.record.status.is_terminal() {
            return Applied::Late;
        }
        if !slot.record.record_response(agent_id, body) {
            return Applied::Duplicate;
        }
        let latency_ms = (now - slot.record.started_at).num_milliseconds().max(0) as u64;
        Self::settle(slot, now);
        Applied::Recorded { latency_ms }
    }

    /// Settle an agent without a response, e.g. when the send itself failed.
    pub fn apply_failure(
        &mut self,
        command_id: Uuid,
        agent_id: &str,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Applied {
        let Some(slot) = self.slots.get_mut(&command_id) else {
            return Applied::Unknown;
        };
        if slot.record.status.is_terminal() {
            return Applied::Late;
        }
        if !slot.record.record_failure(agent_id, reason) {
            return if slot.record.is_target(agent_id) {
                Applied::Duplicate
            } else {
                Applied::Mismatch
            };
        }
        let latency_ms = (now - slot.record.started_at).num_milliseconds().max(0) as u64;
        Self::settle(slot, now);
        Applied::Recorded { latency_ms }
    }

    fn settle(slot: &mut Slot, now: DateTime<Utc>) {
        if slot.record.finish_if_settled(now) {
            if let Some(done) = slot.done.take() {
                let _ = done.send(());
            }
        }
    }

    /// Close the record for its caller: a still-executing record times out.
    /// Returns `None` if the record is gone.
    pub fn conclude(
        &mut self,
        command_id: Uuid,
        now: DateTime<Utc>,
        execution_time_ms: u64,
    ) -> Option<CommandOutcome> {
        let slot = self.slots.get_mut(&command_id)?;
        if slot.record.status == CommandStatus::Executing {
            slot.record.transition(CommandStatus::TimedOut, now);
        }
        slot.done = None;
        slot.delivered = true;
        Some(CommandOutcome::from_execution(&slot.record, execution_time_ms))
    }

    /// Drop delivered terminal records that finished at least `grace` ago,
    /// and records nobody concluded whose deadline passed at least `grace`
    /// ago. Responses referencing them become `Unknown` afterwards.
    pub fn purge_expired(&mut self, now: DateTime<Utc>, grace: chrono::Duration) -> usize {
        let expired: Vec<Uuid> = self
            .slots
            .iter()
            .filter(|(_, slot)| Self::expired(slot, now, grace))
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            if let Some(slot) = self.slots.remove(id) {
                for message_id in slot.record.dispatched.values() {
                    self.routes.remove(message_id);
                }
            }
        }
        expired.len()
    }

    fn expired(slot: &Slot, now: DateTime<Utc>, grace: chrono::Duration) -> bool {
        if slot.delivered {
            return slot.record.status.is_terminal()
                && slot
                    .record
                    .finished_at
                    .is_some_and(|finished| now - finished >= grace);
        }
        // The caller went away before concluding.
        slot.record
            .deadline
            .checked_add_signed(grace)
            .is_some_and(|limit| now >= limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_models::command::CommandKind;
    use quorum_models::message::DataMap;

    fn executing(targets: &[&str]) -> (CommandExecution, Vec<Uuid>) {
        let now = Utc::now();
        let mut record = CommandExecution::new(
            CommandKind::Forecast,
            targets.iter().map(|t| t.to_string()).collect(),
            now,
            now + chrono::Duration::seconds(5),
            DataMap::new(),
        );
        record.transition(CommandStatus::Executing, now);
        let mut message_ids = Vec::new();
        for target in targets {
            let id = Uuid::new_v4();
            record.dispatched.insert(target.to_string(), id);
            message_ids.push(id);
        }
        (record, message_ids)
    }

    #[test]
    fn full_collection_fires_done() {
        let mut table = ExecutionTable::new();
        let (record, ids) = executing(&["a", "b"]);
        let command_id = record.id;
        let (tx, mut rx) = oneshot::channel();
        table.insert(record, tx);

        let now = Utc::now();
        let applied = table.apply_response(ids[0], "a", ResponseBody::ok(ids[0], serde_json::Value::Null), now);
        assert!(matches!(applied, Applied::Recorded { .. }));
        assert!(rx.try_recv().is_err());
        assert_eq!(table.active_count(), 1);

        table.apply_failure(command_id, "b", "unreachable", now);
        assert!(rx.try_recv().is_ok());
        assert_eq!(table.get(&command_id).unwrap().status, CommandStatus::Completed);
        assert_eq!(table.active_count(), 0);
    }

    #[test]
    fn response_from_wrong_agent_is_mismatch() {
        let mut table = ExecutionTable::new();
        let (record, ids) = executing(&["a", "b"]);
        let (tx, _rx) = oneshot::channel();
        table.insert(record, tx);

        let body = ResponseBody::ok(ids[0], serde_json::Value::Null);
        assert_eq!(table.apply_response(ids[0], "b", body, Utc::now()), Applied::Mismatch);
    }

    #[test]
    fn duplicate_then_late() {
        let mut table = ExecutionTable::new();
        let (record, ids) = executing(&["a", "b"]);
        let command_id = record.id;
        let (tx, _rx) = oneshot::channel();
        table.insert(record, tx);

        let body = ResponseBody::ok(ids[0], serde_json::Value::Null);
        table.apply_response(ids[0], "a", body.clone(), Utc::now());
        assert_eq!(table.apply_response(ids[0], "a", body, Utc::now()), Applied::Duplicate);

        let outcome = table.conclude(command_id, Utc::now(), 10).unwrap();
        assert_eq!(outcome.error.as_deref(), Some("timeout"));
        assert_eq!(outcome.partial_results.unwrap().len(), 1);

        let late = ResponseBody::ok(ids[1], serde_json::Value::Null);
        assert_eq!(table.apply_response(ids[1], "b", late, Utc::now()), Applied::Late);
    }

    #[test]
    fn purge_waits_for_grace() {
        let mut table = ExecutionTable::new();
        let (record, ids) = executing(&["a"]);
        let command_id = record.id;
        let (tx, _rx) = oneshot::channel();
        table.insert(record, tx);

        let now = Utc::now();
        let grace = chrono::Duration::seconds(300);
        assert_eq!(table.purge_expired(now + chrono::Duration::seconds(60), grace), 0);

        table.conclude(command_id, now, 5);
        assert_eq!(table.purge_expired(now + chrono::Duration::seconds(299), grace), 0);
        assert_eq!(table.purge_expired(now + chrono::Duration::seconds(300), grace), 1);
        assert!(table.is_empty());

        let body = ResponseBody::ok(ids[0], serde_json::Value::Null);
        assert_eq!(table.apply_response(ids[0], "a", body, now), Applied::Unknown);
    }

    #[test]
    fn abandoned_records_are_purged_after_deadline() {
        let mut table = ExecutionTable::new();
        let (record, ids) = executing(&["a"]);
        let deadline = record.deadline;
        let (tx, rx) = oneshot::channel();
        table.insert(record, tx);
        drop(rx);

        let grace = chrono::Duration::seconds(300);
        assert_eq!(table.purge_expired(deadline, grace), 0);
        assert_eq!(table.active_count(), 1);
        assert_eq!(table.purge_expired(deadline + grace, grace), 1);
        assert_eq!(table.active_count(), 0);

        let body = ResponseBody::ok(ids[0], serde_json::Value::Null);
        assert_eq!(table.apply_response(ids[0], "a", body, Utc::now()), Applied::Unknown);
    }
}
