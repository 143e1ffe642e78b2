//! Columnar event storage and execution of query plans.
//!
//! [`MemoryEventStore`] keeps one vector per catalog column. A query scans
//! the project and timestamp columns first, evaluates scalar conditions on
//! the surviving events, expands the array join, and only then reads the
//! output columns.

use crate::columns::{ColumnCatalog, ColumnDef};
use crate::event::{EventError, EventPayload, EventRow};
use crate::query::{AggregateFunction, Aggregation, Condition, OutputSource, QueryPlan};
use crate::value::Value;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, instrument};

/// Store failures
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Rejected event: {0}")]
    InvalidEvent(#[from] EventError),

    #[error("Event store lock was poisoned")]
    LockPoisoned,

    #[error("Event store unavailable: {message}")]
    Unavailable { message: String },
}

/// Name and storage type of a result column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

/// Rows returned by a query, holding only the requested output columns
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub data: Vec<serde_json::Map<String, serde_json::Value>>,
    pub meta: Vec<ColumnMeta>,
}

/// Interface for event storage and querying
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Store a batch of events; the batch is rejected as a whole if any event is invalid
    async fn insert(&self, events: Vec<EventPayload>) -> Result<usize, StoreError>;

    /// Execute a translated query
    async fn query(&self, plan: &QueryPlan) -> Result<QueryResult, StoreError>;

    /// Number of stored events
    async fn event_count(&self) -> Result<usize, StoreError>;
}

#[derive(Debug)]
struct ColumnarTable {
    columns: Vec<Vec<Value>>,
    rows: usize,
}

impl ColumnarTable {
    fn new() -> Self {
        Self {
            columns: vec![Vec::new(); ColumnCatalog.columns().len()],
            rows: 0,
        }
    }

    fn append(&mut self, row: EventRow) {
        for (column, cell) in self.columns.iter_mut().zip(row.into_cells()) {
            column.push(cell);
        }
        self.rows += 1;
    }
}

/// In-memory columnar implementation of [`EventStore`]
#[derive(Debug, Clone)]
pub struct MemoryEventStore {
    table: Arc<RwLock<ColumnarTable>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self {
            table: Arc::new(RwLock::new(ColumnarTable::new())),
        }
    }
}

impl Default for MemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    #[instrument(skip(self, events), fields(batch_size = events.len()))]
    async fn insert(&self, events: Vec<EventPayload>) -> Result<usize, StoreError> {
        let rows = events
            .iter()
            .map(EventRow::from_payload)
            .collect::<Result<Vec<_>, _>>()?;

        let count = rows.len();
        let mut table = self.table.write().map_err(|_| StoreError::LockPoisoned)?;
        for row in rows {
            table.append(row);
        }

        info!(inserted = count, total = table.rows, "Stored events");
        Ok(count)
    }

    #[instrument(skip(self, plan), fields(projects = ?plan.projects, array_join = ?plan.array_join))]
    async fn query(&self, plan: &QueryPlan) -> Result<QueryResult, StoreError> {
        let table = self.table.read().map_err(|_| StoreError::LockPoisoned)?;
        let result = execute(&table, plan);
        debug!(rows = result.data.len(), "Executed query plan");
        Ok(result)
    }

    async fn event_count(&self) -> Result<usize, StoreError> {
        let table = self.table.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(table.rows)
    }
}

// ============================================================================
// Execution
// ============================================================================

/// A result row before projection: an event, and the joined element if any
#[derive(Debug, Clone, Copy)]
struct RowRef {
    event: usize,
    element: Option<usize>,
}

struct Executor<'a> {
    table: &'a ColumnarTable,
    plan: &'a QueryPlan,
}

impl<'a> Executor<'a> {
    fn column(&self, column: &ColumnDef) -> &'a [Value] {
        &self.table.columns[column.index]
    }

    fn column_by_name(&self, name: &str) -> Option<&'a [Value]> {
        ColumnCatalog.get(name).map(|c| self.column(c))
    }

    /// Value of `column` as seen by `row`, reading the joined element when applicable
    fn cell(&self, column: &ColumnDef, row: RowRef) -> Value {
        let cell = &self.column(column)[row.event];
        match row.element {
            Some(i) if self.plan.is_joined(column) => {
                cell.as_array().and_then(|items| items.get(i)).cloned().unwrap_or(Value::Null)
            }
            _ => cell.clone(),
        }
    }

    fn candidate_events(&self) -> Vec<usize> {
        let projects: HashSet<u64> = self.plan.projects.iter().map(|p| p.as_u64()).collect();
        let project_ids = self.column_by_name("project_id").unwrap_or_default();
        let timestamps = self.column_by_name("timestamp").unwrap_or_default();

        let event_conditions: Vec<&Condition> = self
            .plan
            .conditions
            .iter()
            .filter(|c| !self.plan.is_joined(c.column))
            .collect();

        (0..self.table.rows)
            .filter(|&event| matches!(project_ids.get(event), Some(Value::UInt(id)) if projects.contains(id)))
            .filter(|&event| {
                matches!(timestamps.get(event), Some(Value::DateTime(ts)) if self.plan.window.contains(ts))
            })
            .filter(|&event| {
                event_conditions
                    .iter()
                    .all(|condition| condition.matches(&self.column(condition.column)[event], false))
            })
            .collect()
    }

    fn expand(&self, events: Vec<usize>) -> Vec<RowRef> {
        let Some(nested) = self.plan.array_join else {
            return events
                .into_iter()
                .map(|event| RowRef {
                    event,
                    element: None,
                })
                .collect();
        };

        let members: Vec<&ColumnDef> = ColumnCatalog.nested_members(nested).collect();
        let joined_conditions: Vec<&Condition> = self
            .plan
            .conditions
            .iter()
            .filter(|c| self.plan.is_joined(c.column))
            .collect();

        let mut rows = Vec::new();
        for event in events {
            let length = members
                .first()
                .and_then(|m| self.column(m)[event].as_array().map(<[Value]>::len))
                .unwrap_or(0);
            for element in 0..length {
                let row = RowRef {
                    event,
                    element: Some(element),
                };
                if joined_conditions
                    .iter()
                    .all(|c| c.matches(&self.cell(c.column, row), true))
                {
                    rows.push(row);
                }
            }
        }
        rows
    }

    fn run(&self) -> QueryResult {
        let events = self.candidate_events();
        let rows = self.expand(events);

        let data = if self.plan.is_aggregated() {
            self.aggregate(&rows)
        } else {
            self.select(rows)
        };

        QueryResult {
            data: data
                .into_iter()
                .map(|values| {
                    self.plan
                        .output
                        .iter()
                        .zip(values)
                        .map(|(column, value)| (column.name.clone(), value.to_json()))
                        .collect()
                })
                .collect(),
            meta: self
                .plan
                .output
                .iter()
                .map(|column| ColumnMeta {
                    name: column.name.clone(),
                    type_name: column.type_name.clone(),
                })
                .collect(),
        }
    }

    fn select(&self, mut rows: Vec<RowRef>) -> Vec<Vec<Value>> {
        let sort_columns: Vec<(&ColumnDef, bool)> = self
            .plan
            .orderby
            .iter()
            .filter_map(|key| ColumnCatalog.get(&key.column).map(|c| (c, key.descending)))
            .collect();

        if !sort_columns.is_empty() {
            rows.sort_by(|a, b| {
                for (column, descending) in &sort_columns {
                    let ordering = self.cell(column, *a).sort_cmp(&self.cell(column, *b));
                    let ordering = if *descending { ordering.reverse() } else { ordering };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }
        rows.truncate(self.plan.limit);

        rows.into_iter()
            .map(|row| {
                self.plan
                    .output
                    .iter()
                    .map(|output| match output.source {
                        OutputSource::Column(column) => self.cell(column, row),
                        OutputSource::Aggregate(_) => Value::Null,
                    })
                    .collect()
            })
            .collect()
    }

    fn aggregate(&self, rows: &[RowRef]) -> Vec<Vec<Value>> {
        let mut order: Vec<Vec<Value>> = Vec::new();
        let mut groups: HashMap<Vec<Value>, Vec<RowRef>> = HashMap::new();

        for row in rows {
            let key: Vec<Value> = self
                .plan
                .groupby
                .iter()
                .map(|column| self.cell(column, *row))
                .collect();
            groups
                .entry(key.clone())
                .or_insert_with(|| {
                    order.push(key);
                    Vec::new()
                })
                .push(*row);
        }

        // An ungrouped aggregation always yields exactly one row
        if self.plan.groupby.is_empty() && order.is_empty() {
            order.push(Vec::new());
            groups.insert(Vec::new(), Vec::new());
        }

        let mut output: Vec<Vec<Value>> = order
            .into_iter()
            .map(|key| {
                let members = groups.get(&key).map(Vec::as_slice).unwrap_or_default();
                let mut values = key;
                values.extend(
                    self.plan
                        .aggregations
                        .iter()
                        .map(|aggregation| self.evaluate(aggregation, members)),
                );
                values
            })
            .collect();

        let sort_keys: Vec<(usize, bool)> = self
            .plan
            .orderby
            .iter()
            .filter_map(|key| {
                self.plan
                    .output
                    .iter()
                    .position(|o| o.name == key.column)
                    .map(|index| (index, key.descending))
            })
            .collect();

        if !sort_keys.is_empty() {
            output.sort_by(|a, b| {
                for (index, descending) in &sort_keys {
                    let ordering = a[*index].sort_cmp(&b[*index]);
                    let ordering = if *descending { ordering.reverse() } else { ordering };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }
        output.truncate(self.plan.limit);
        output
    }

    fn evaluate(&self, aggregation: &Aggregation, rows: &[RowRef]) -> Value {
        let values = || -> Vec<Value> {
            match aggregation.column {
                Some(column) => rows
                    .iter()
                    .map(|row| self.cell(column, *row))
                    .filter(|v| !v.is_null())
                    .collect(),
                None => Vec::new(),
            }
        };

        match aggregation.function {
            AggregateFunction::Count => match aggregation.column {
                Some(_) => Value::UInt(values().len() as u64),
                None => Value::UInt(rows.len() as u64),
            },
            AggregateFunction::Uniq => {
                let distinct: HashSet<Value> = values().into_iter().collect();
                Value::UInt(distinct.len() as u64)
            }
            AggregateFunction::Min => values()
                .into_iter()
                .min_by(|a, b| a.sort_cmp(b))
                .unwrap_or(Value::Null),
            AggregateFunction::Max => values()
                .into_iter()
                .max_by(|a, b| a.sort_cmp(b))
                .unwrap_or(Value::Null),
            AggregateFunction::Avg => {
                let numbers: Vec<f64> = values().iter().filter_map(Value::as_f64).collect();
                if numbers.is_empty() {
                    Value::Null
                } else {
                    Value::Float(numbers.iter().sum::<f64>() / numbers.len() as f64)
                }
            }
            AggregateFunction::Sum => Value::UInt(
                values()
                    .iter()
                    .filter_map(|v| match v {
                        Value::UInt(n) => Some(*n),
                        _ => None,
                    })
                    .fold(0u64, u64::saturating_add),
            ),
        }
    }
}

fn execute(table: &ColumnarTable, plan: &QueryPlan) -> QueryResult {
    Executor { table, plan }.run()
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
