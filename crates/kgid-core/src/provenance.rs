//! Provenance ledger
//!
//! One operation record per unit of extraction work. A record is created
//! open by `start_operation` and closed exactly once by `complete_operation`;
//! every completion field lives in a single [`OperationCompletion`] so a
//! record can never be observed half-closed.
//!
//! Completion policy: a second completion attempt is rejected with
//! `AlreadyCompleted` and the original completion is left untouched.
//!
//! Transitions are logged at INFO with the "provenance" target so the audit
//! trail can be routed separately from application logs.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{KgidError, Result};

/// Completion payload, set once when an operation closes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationCompletion {
    /// When the operation closed
    pub completed_at: DateTime<Utc>,

    /// References to produced artifacts; empty on failure
    pub outputs: Vec<String>,

    /// Whether the unit of work succeeded
    pub success: bool,

    /// Failure reason; present exactly when `success` is false
    pub error_message: Option<String>,

    /// Completion metadata (counts, types, ...)
    pub metadata: HashMap<String, serde_json::Value>,
}

/// One audit row per unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    /// Unique identifier
    pub id: Uuid,

    /// Strategy or component that ran the operation
    pub tool_id: String,

    /// Kind of work (e.g. "extract_entity")
    pub operation_type: String,

    /// References consumed by the operation
    pub inputs: Vec<String>,

    /// Parameter snapshot at start
    pub parameters: HashMap<String, serde_json::Value>,

    /// Start timestamp
    pub started_at: DateTime<Utc>,

    /// Absent while the operation is open
    pub completion: Option<OperationCompletion>,
}

/// Lifecycle state of an operation record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Open,
    Succeeded,
    Failed,
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl OperationRecord {
    /// Current lifecycle state
    pub fn status(&self) -> OperationStatus {
        match &self.completion {
            None => OperationStatus::Open,
            Some(c) if c.success => OperationStatus::Succeeded,
            Some(_) => OperationStatus::Failed,
        }
    }

    /// Whether the operation is still open
    pub fn is_open(&self) -> bool {
        self.completion.is_none()
    }

    /// Wall-clock duration, once closed
    pub fn duration_ms(&self) -> Option<i64> {
        self.completion
            .as_ref()
            .map(|c| (c.completed_at - self.started_at).num_milliseconds())
    }

    /// Produced artifact references (empty while open)
    pub fn outputs(&self) -> &[String] {
        self.completion
            .as_ref()
            .map(|c| c.outputs.as_slice())
            .unwrap_or_default()
    }

    /// Check the closed-record invariants
    pub fn validate(&self) -> Result<()> {
        if let Some(completion) = &self.completion {
            check_completion(
                completion.success,
                &completion.outputs,
                completion.error_message.as_deref(),
            )
            .map_err(|e| KgidError::ValidationError(format!("operation {}: {e}", self.id)))?;
        }
        Ok(())
    }
}

/// Which way to walk the lineage graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineageDirection {
    /// Operations that produced the reference, then their inputs
    Backward,
    /// Operations that consumed the reference, then their outputs
    Forward,
}

/// Aggregate ledger counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerStatistics {
    pub total_operations: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub open: usize,
    pub average_duration_ms: f64,
    pub by_tool: BTreeMap<String, usize>,
    pub by_operation: BTreeMap<String, usize>,
}

#[derive(Debug, Default)]
struct LedgerState {
    by_id: HashMap<Uuid, OperationRecord>,
    order: Vec<Uuid>,
}

impl LedgerState {
    fn ordered(&self) -> impl Iterator<Item = &OperationRecord> {
        self.order.iter().filter_map(|id| self.by_id.get(id))
    }
}

/// Append-only operation ledger
#[derive(Debug, Default)]
pub struct ProvenanceLedger {
    state: RwLock<LedgerState>,
}

impl ProvenanceLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new operation and return its identifier
    pub fn start_operation(
        &self,
        tool_id: &str,
        operation_type: &str,
        inputs: Vec<String>,
        parameters: HashMap<String, serde_json::Value>,
    ) -> Uuid {
        let record = OperationRecord {
            id: Uuid::new_v4(),
            tool_id: tool_id.to_string(),
            operation_type: operation_type.to_string(),
            inputs,
            parameters,
            started_at: Utc::now(),
            completion: None,
        };
        let operation_id = record.id;

        info!(
            target: "provenance",
            %operation_id,
            tool_id,
            operation_type,
            inputs = ?record.inputs,
            "Operation started"
        );

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.order.push(operation_id);
        state.by_id.insert(operation_id, record);
        operation_id
    }

    /// Close an operation exactly once
    ///
    /// A blank error message is treated as absent. On any error the operation
    /// is left exactly as it was.
    pub fn complete_operation(
        &self,
        operation_id: Uuid,
        outputs: Vec<String>,
        success: bool,
        metadata: Option<HashMap<String, serde_json::Value>>,
        error_message: Option<String>,
    ) -> Result<OperationRecord> {
        let error_message = error_message.filter(|m| !m.trim().is_empty());

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let record = state
            .by_id
            .get_mut(&operation_id)
            .ok_or_else(|| KgidError::NotFound(format!("operation {operation_id}")))?;

        if record.completion.is_some() {
            warn!(target: "provenance", %operation_id, "Rejected second completion");
            return Err(KgidError::AlreadyCompleted(operation_id));
        }

        check_completion(success, &outputs, error_message.as_deref())
            .map_err(KgidError::ValidationError)?;

        record.completion = Some(OperationCompletion {
            completed_at: Utc::now(),
            outputs,
            success,
            error_message,
            metadata: metadata.unwrap_or_default(),
        });

        if success {
            info!(
                target: "provenance",
                %operation_id,
                tool_id = %record.tool_id,
                outputs = record.outputs().len(),
                duration_ms = record.duration_ms().unwrap_or_default(),
                "Operation succeeded"
            );
        } else {
            warn!(
                target: "provenance",
                %operation_id,
                tool_id = %record.tool_id,
                error = record
                    .completion
                    .as_ref()
                    .and_then(|c| c.error_message.as_deref())
                    .unwrap_or_default(),
                "Operation failed"
            );
        }

        Ok(record.clone())
    }

    /// Close an operation as failed with no outputs
    pub fn fail_operation(
        &self,
        operation_id: Uuid,
        error_message: impl Into<String>,
    ) -> Result<OperationRecord> {
        self.complete_operation(
            operation_id,
            Vec::new(),
            false,
            None,
            Some(error_message.into()),
        )
    }

    /// Get an operation by ID
    pub fn get_operation(&self, operation_id: Uuid) -> Option<OperationRecord> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .get(&operation_id)
            .cloned()
    }

    /// Every operation, in start order
    pub fn operations(&self) -> Vec<OperationRecord> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .ordered()
            .cloned()
            .collect()
    }

    /// Operations that have not been completed yet
    pub fn open_operations(&self) -> Vec<OperationRecord> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .ordered()
            .filter(|r| r.is_open())
            .cloned()
            .collect()
    }

    /// Walk producer or consumer operations from a reference
    pub fn lineage(
        &self,
        reference: &str,
        direction: LineageDirection,
        max_depth: usize,
    ) -> Vec<OperationRecord> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut visited_refs = HashSet::new();
        let mut seen_ops = HashSet::new();
        let mut lineage = Vec::new();
        let mut frontier = vec![(reference.to_string(), 0usize)];

        while let Some((current, depth)) = frontier.pop() {
            if depth >= max_depth || !visited_refs.insert(current.clone()) {
                continue;
            }

            for record in state.ordered() {
                let (matches, next) = match direction {
                    LineageDirection::Backward => {
                        (record.outputs().contains(&current), record.inputs.as_slice())
                    }
                    LineageDirection::Forward => {
                        (record.inputs.contains(&current), record.outputs())
                    }
                };
                if !matches {
                    continue;
                }
                if seen_ops.insert(record.id) {
                    lineage.push(record.clone());
                }
                frontier.extend(next.iter().map(|r| (r.clone(), depth + 1)));
            }
        }

        lineage.sort_by_key(|r| r.started_at);
        lineage
    }

    /// Ledger statistics
    pub fn statistics(&self) -> LedgerStatistics {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut stats = LedgerStatistics::default();
        let mut durations = Vec::new();

        for record in state.ordered() {
            stats.total_operations += 1;
            match record.status() {
                OperationStatus::Open => stats.open += 1,
                OperationStatus::Succeeded => stats.succeeded += 1,
                OperationStatus::Failed => stats.failed += 1,
            }
            if let Some(ms) = record.duration_ms() {
                durations.push(ms as f64);
            }
            *stats.by_tool.entry(record.tool_id.clone()).or_default() += 1;
            *stats
                .by_operation
                .entry(record.operation_type.clone())
                .or_default() += 1;
        }

        if !durations.is_empty() {
            stats.average_duration_ms = durations.iter().sum::<f64>() / durations.len() as f64;
        }
        stats
    }

    /// Replace the ledger contents with exported records
    pub(crate) fn restore(&self, records: Vec<OperationRecord>) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        *state = LedgerState::default();
        for record in records {
            state.order.push(record.id);
            state.by_id.insert(record.id, record);
        }
    }
}

fn check_completion(
    success: bool,
    outputs: &[String],
    error_message: Option<&str>,
) -> std::result::Result<(), String> {
    match (success, error_message) {
        (true, Some(message)) => Err(format!(
            "successful completion cannot carry an error message: {message}"
        )),
        (false, None) => Err("failed completion requires a non-empty error message".to_string()),
        (false, Some(_)) if !outputs.is_empty() => {
            Err("failed completion must not report outputs".to_string())
        }
        _ => Ok(()),
    }
}
