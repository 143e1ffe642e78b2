//! Discover query requests and their translation into execution plans.
//!
//! A [`DiscoverQuery`] is the JSON body posted by API clients. Translation
//! resolves every referenced column against the [`ColumnCatalog`], coerces
//! condition operands to the column types, resolves the date window, and
//! decides which nested group (if any) is array-joined. The resulting
//! [`QueryPlan`] is what an [`EventStore`](crate::EventStore) executes.
//!
//! # Array columns
//!
//! Naming an array column in `fields`, `groupby`, or an aggregation
//! array-joins its nested group: the result has one row per element. Only a
//! single nested group can be joined per query.
//!
//! Conditions never trigger a join. A condition on an array column that is
//! not joined matches an event when **any** element satisfies a positive
//! operator (`=`, `IN`, `LIKE`, ...) and only when **all** elements satisfy a
//! negative operator (`!=`, `NOT IN`, `NOT LIKE`).

use crate::columns::{ColumnCatalog, ColumnDef, ColumnType, ScalarType};
use crate::range::{DateWindow, RangeError};
use crate::value::Value;
use crate::{ProjectId, Timestamp};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Query translation failures; all of them are caller errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error(transparent)]
    Range(#[from] RangeError),

    #[error("At least one project is required")]
    MissingProjects,

    #[error("At least one field or aggregation is required")]
    NoColumnsSelected,

    #[error("Unknown column '{name}'")]
    UnknownColumn { name: String },

    #[error("Unknown operator '{operator}'")]
    UnknownOperator { operator: String },

    #[error("Condition {index} is malformed: {reason}")]
    MalformedCondition { index: usize, reason: String },

    #[error("Invalid value for '{column}': {reason}")]
    InvalidConditionValue { column: String, reason: String },

    #[error("Cannot array join both '{first}' and '{second}'")]
    MultipleArrayJoins { first: String, second: String },

    #[error("Unknown aggregate function '{function}'")]
    UnknownAggregate { function: String },

    #[error("Invalid aggregation '{alias}': {reason}")]
    InvalidAggregation { alias: String, reason: String },

    #[error("Column '{name}' appears more than once in the output")]
    DuplicateColumn { name: String },

    #[error("Field '{name}' must be listed in groupby when aggregating")]
    UngroupedField { name: String },

    #[error("Cannot order by '{name}'")]
    InvalidOrderBy { name: String },

    #[error("Limit must be between 1 and {max}, got {limit}")]
    InvalidLimit { limit: u64, max: u64 },
}

// ============================================================================
// Request
// ============================================================================

/// Ordering as accepted on the wire: a single key or a list of keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OrderBySpec {
    One(String),
    Many(Vec<String>),
}

impl OrderBySpec {
    fn keys(&self) -> Vec<&str> {
        match self {
            Self::One(key) => vec![key.as_str()],
            Self::Many(keys) => keys.iter().map(String::as_str).collect(),
        }
    }
}

/// Body of a discover query request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoverQuery {
    pub projects: Vec<u64>,

    #[serde(default)]
    pub fields: Vec<String>,

    /// `[column, operator, value]` triples
    #[serde(default)]
    pub conditions: Vec<Vec<serde_json::Value>>,

    /// `[function, column, alias]` triples
    #[serde(default)]
    pub aggregations: Vec<(String, Option<String>, String)>,

    #[serde(default)]
    pub groupby: Vec<String>,

    #[serde(default)]
    pub start: Option<String>,

    #[serde(default)]
    pub end: Option<String>,

    #[serde(default)]
    pub range: Option<String>,

    #[serde(default)]
    pub orderby: Option<OrderBySpec>,

    #[serde(default)]
    pub limit: Option<u64>,
}

/// Row limits applied during translation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryLimits {
    pub default_limit: u64,
    pub max_limit: u64,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            default_limit: 1000,
            max_limit: 1000,
        }
    }
}

// ============================================================================
// Plan
// ============================================================================

/// Comparison operator of a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
    Gt,
    Lt,
    Gte,
    Lte,
    In,
    NotIn,
    Like,
    NotLike,
    IsNull,
    IsNotNull,
}

impl Operator {
    /// Negative operators must hold for every element of an array column
    pub fn is_negative(&self) -> bool {
        matches!(self, Self::NotEq | Self::NotIn | Self::NotLike)
    }

    fn takes_operand(&self) -> bool {
        !matches!(self, Self::IsNull | Self::IsNotNull)
    }
}

impl FromStr for Operator {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ");
        match normalized.to_uppercase().as_str() {
            "=" => Ok(Self::Eq),
            "!=" => Ok(Self::NotEq),
            ">" => Ok(Self::Gt),
            "<" => Ok(Self::Lt),
            ">=" => Ok(Self::Gte),
            "<=" => Ok(Self::Lte),
            "IN" => Ok(Self::In),
            "NOT IN" => Ok(Self::NotIn),
            "LIKE" => Ok(Self::Like),
            "NOT LIKE" => Ok(Self::NotLike),
            "IS NULL" => Ok(Self::IsNull),
            "IS NOT NULL" => Ok(Self::IsNotNull),
            _ => Err(QueryError::UnknownOperator {
                operator: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Gte => ">=",
            Self::Lte => "<=",
            Self::In => "IN",
            Self::NotIn => "NOT IN",
            Self::Like => "LIKE",
            Self::NotLike => "NOT LIKE",
            Self::IsNull => "IS NULL",
            Self::IsNotNull => "IS NOT NULL",
        };
        write!(f, "{}", s)
    }
}

/// Right-hand side of a condition, already coerced to the column type
#[derive(Debug, Clone)]
pub enum Operand {
    None,
    Single(Value),
    List(Vec<Value>),
    Pattern(Regex),
}

/// A translated filter condition
#[derive(Debug, Clone)]
pub struct Condition {
    pub column: &'static ColumnDef,
    pub operator: Operator,
    pub operand: Operand,
}

impl Condition {
    /// Evaluate against a cell
    ///
    /// `joined` tells whether the cell is the element of an array-joined
    /// column rather than the whole array.
    pub fn matches(&self, cell: &Value, joined: bool) -> bool {
        if !self.column.is_array() || joined {
            return self.matches_element(cell);
        }

        let elements = cell.as_array().unwrap_or_default();
        if self.operator.is_negative() {
            elements.iter().all(|element| self.matches_element(element))
        } else {
            elements.iter().any(|element| self.matches_element(element))
        }
    }

    /// Evaluate against a single scalar value; NULL never compares
    pub fn matches_element(&self, value: &Value) -> bool {
        use std::cmp::Ordering;

        match (&self.operator, &self.operand) {
            (Operator::IsNull, _) => value.is_null(),
            (Operator::IsNotNull, _) => !value.is_null(),
            (Operator::Eq, Operand::Single(rhs)) => value.compare(rhs) == Some(Ordering::Equal),
            (Operator::NotEq, Operand::Single(rhs)) => {
                matches!(value.compare(rhs), Some(o) if o != Ordering::Equal)
            }
            (Operator::Gt, Operand::Single(rhs)) => value.compare(rhs) == Some(Ordering::Greater),
            (Operator::Lt, Operand::Single(rhs)) => value.compare(rhs) == Some(Ordering::Less),
            (Operator::Gte, Operand::Single(rhs)) => matches!(
                value.compare(rhs),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            (Operator::Lte, Operand::Single(rhs)) => {
                matches!(value.compare(rhs), Some(Ordering::Less | Ordering::Equal))
            }
            (Operator::In, Operand::List(items)) => items
                .iter()
                .any(|item| value.compare(item) == Some(Ordering::Equal)),
            (Operator::NotIn, Operand::List(items)) => {
                !value.is_null()
                    && items
                        .iter()
                        .all(|item| value.compare(item) != Some(Ordering::Equal))
            }
            (Operator::Like, Operand::Pattern(re)) => value.as_str().is_some_and(|s| re.is_match(s)),
            (Operator::NotLike, Operand::Pattern(re)) => {
                value.as_str().is_some_and(|s| !re.is_match(s))
            }
            _ => false,
        }
    }
}

/// Aggregate functions available to discover queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Uniq,
    Min,
    Max,
    Avg,
    Sum,
}

impl FromStr for AggregateFunction {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "count()" | "count" => Ok(Self::Count),
            "uniq" => Ok(Self::Uniq),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "avg" => Ok(Self::Avg),
            "sum" => Ok(Self::Sum),
            _ => Err(QueryError::UnknownAggregate {
                function: s.to_string(),
            }),
        }
    }
}

/// A translated aggregation
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub function: AggregateFunction,
    pub column: Option<&'static ColumnDef>,
    pub alias: String,
}

impl Aggregation {
    fn result_type(&self) -> String {
        match self.function {
            AggregateFunction::Count | AggregateFunction::Uniq | AggregateFunction::Sum => {
                "UInt64".to_string()
            }
            AggregateFunction::Avg => "Nullable(Float64)".to_string(),
            AggregateFunction::Min | AggregateFunction::Max => match self.column {
                Some(column) => ColumnType {
                    nullable: true,
                    ..column.column_type.element()
                }
                .to_string(),
                None => "Nullable(String)".to_string(),
            },
        }
    }
}

/// Sort key over an output or catalog column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

impl OrderBy {
    fn parse(key: &str) -> Self {
        match key.strip_prefix('-') {
            Some(column) => Self {
                column: column.to_string(),
                descending: true,
            },
            None => Self {
                column: key.to_string(),
                descending: false,
            },
        }
    }
}

/// Where an output column takes its values from
#[derive(Debug, Clone, PartialEq)]
pub enum OutputSource {
    Column(&'static ColumnDef),
    Aggregate(usize),
}

/// A column of the result set
#[derive(Debug, Clone, PartialEq)]
pub struct OutputColumn {
    pub name: String,
    pub type_name: String,
    pub source: OutputSource,
}

/// Fully validated, ready-to-execute query
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub projects: Vec<ProjectId>,
    pub window: DateWindow,
    pub conditions: Vec<Condition>,
    /// Nested group expanded into one row per element
    pub array_join: Option<&'static str>,
    pub groupby: Vec<&'static ColumnDef>,
    pub aggregations: Vec<Aggregation>,
    pub output: Vec<OutputColumn>,
    pub orderby: Vec<OrderBy>,
    pub limit: usize,
}

impl QueryPlan {
    /// Whether rows are grouped before output
    pub fn is_aggregated(&self) -> bool {
        !self.aggregations.is_empty() || !self.groupby.is_empty()
    }

    /// Whether `column` is read per element of the array join
    pub fn is_joined(&self, column: &ColumnDef) -> bool {
        column.nested.is_some() && column.nested == self.array_join
    }
}

// ============================================================================
// Translation
// ============================================================================

impl DiscoverQuery {
    /// Validate the request and translate it into an execution plan
    pub fn translate(&self, now: Timestamp, limits: &QueryLimits) -> Result<QueryPlan, QueryError> {
        let catalog = ColumnCatalog;

        if self.projects.is_empty() {
            return Err(QueryError::MissingProjects);
        }
        let mut projects: Vec<ProjectId> = self.projects.iter().copied().map(ProjectId::new).collect();
        projects.sort();
        projects.dedup();

        let window = DateWindow::resolve(
            non_empty(&self.start),
            non_empty(&self.end),
            non_empty(&self.range),
            now,
        )?;

        let limit = self.limit.unwrap_or(limits.default_limit);
        if limit == 0 || limit > limits.max_limit {
            return Err(QueryError::InvalidLimit {
                limit,
                max: limits.max_limit,
            });
        }

        let mut fields = Vec::new();
        for name in &self.fields {
            let column = resolve(&catalog, name)?;
            if !fields.contains(&column) {
                fields.push(column);
            }
        }

        let mut groupby = Vec::new();
        for name in &self.groupby {
            let column = resolve(&catalog, name)?;
            if !groupby.contains(&column) {
                groupby.push(column);
            }
        }

        let aggregations = self
            .aggregations
            .iter()
            .map(|(function, column, alias)| translate_aggregation(&catalog, function, column, alias))
            .collect::<Result<Vec<_>, _>>()?;

        if fields.is_empty() && aggregations.is_empty() && groupby.is_empty() {
            return Err(QueryError::NoColumnsSelected);
        }

        let conditions = self
            .conditions
            .iter()
            .enumerate()
            .map(|(index, raw)| translate_condition(&catalog, index, raw))
            .collect::<Result<Vec<_>, _>>()?;

        let array_join = resolve_array_join(
            fields
                .iter()
                .chain(groupby.iter())
                .copied()
                .chain(aggregations.iter().filter_map(|a| a.column)),
        )?;

        let aggregated = !aggregations.is_empty() || !groupby.is_empty();
        let output = if aggregated {
            for field in &fields {
                if !groupby.contains(field) {
                    return Err(QueryError::UngroupedField {
                        name: field.name.to_string(),
                    });
                }
            }
            let mut output: Vec<OutputColumn> = groupby
                .iter()
                .map(|column| column_output(column, array_join))
                .collect();
            for (index, aggregation) in aggregations.iter().enumerate() {
                if output.iter().any(|o| o.name == aggregation.alias) {
                    return Err(QueryError::DuplicateColumn {
                        name: aggregation.alias.clone(),
                    });
                }
                output.push(OutputColumn {
                    name: aggregation.alias.clone(),
                    type_name: aggregation.result_type(),
                    source: OutputSource::Aggregate(index),
                });
            }
            output
        } else {
            fields
                .iter()
                .map(|column| column_output(column, array_join))
                .collect()
        };

        let orderby: Vec<OrderBy> = self
            .orderby
            .as_ref()
            .map(|keys| keys.keys().into_iter().filter(|k| !k.is_empty()).map(OrderBy::parse).collect())
            .unwrap_or_default();
        for key in &orderby {
            let known = if aggregated {
                output.iter().any(|o| o.name == key.column)
            } else {
                catalog.get(&key.column).is_some()
            };
            if !known {
                return Err(QueryError::InvalidOrderBy {
                    name: key.column.clone(),
                });
            }
        }

        Ok(QueryPlan {
            projects,
            window,
            conditions,
            array_join,
            groupby,
            aggregations,
            output,
            orderby,
            limit: usize::try_from(limit).unwrap_or(usize::MAX),
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

fn resolve(catalog: &ColumnCatalog, name: &str) -> Result<&'static ColumnDef, QueryError> {
    catalog.get(name).ok_or_else(|| QueryError::UnknownColumn {
        name: name.to_string(),
    })
}

fn column_output(column: &'static ColumnDef, array_join: Option<&str>) -> OutputColumn {
    let joined = column.nested.is_some() && column.nested == array_join;
    let column_type = if joined {
        column.column_type.element()
    } else {
        column.column_type
    };
    OutputColumn {
        name: column.name.to_string(),
        type_name: column_type.to_string(),
        source: OutputSource::Column(column),
    }
}

fn resolve_array_join(
    columns: impl Iterator<Item = &'static ColumnDef>,
) -> Result<Option<&'static str>, QueryError> {
    let mut joined: Option<&'static str> = None;
    for nested in columns.filter_map(|c| c.nested) {
        match joined {
            None => joined = Some(nested),
            Some(current) if current == nested => {}
            Some(current) => {
                return Err(QueryError::MultipleArrayJoins {
                    first: current.to_string(),
                    second: nested.to_string(),
                })
            }
        }
    }
    Ok(joined)
}

fn translate_aggregation(
    catalog: &ColumnCatalog,
    function: &str,
    column: &Option<String>,
    alias: &str,
) -> Result<Aggregation, QueryError> {
    let function: AggregateFunction = function.parse()?;
    let invalid = |reason: &str| QueryError::InvalidAggregation {
        alias: alias.to_string(),
        reason: reason.to_string(),
    };

    if alias.trim().is_empty() {
        return Err(invalid("alias is required"));
    }

    let column = match column.as_deref().filter(|c| !c.is_empty()) {
        Some(name) => Some(resolve(catalog, name)?),
        None => None,
    };

    match (function, column) {
        (AggregateFunction::Count, _) => {}
        (_, None) => return Err(invalid("a column is required")),
        (AggregateFunction::Avg | AggregateFunction::Sum, Some(c))
            if c.column_type.scalar != ScalarType::UInt =>
        {
            return Err(invalid("a numeric column is required"))
        }
        _ => {}
    }

    Ok(Aggregation {
        function,
        column,
        alias: alias.to_string(),
    })
}

fn translate_condition(
    catalog: &ColumnCatalog,
    index: usize,
    raw: &[serde_json::Value],
) -> Result<Condition, QueryError> {
    let malformed = |reason: &str| QueryError::MalformedCondition {
        index,
        reason: reason.to_string(),
    };

    if raw.len() < 2 || raw.len() > 3 {
        return Err(malformed("expected [column, operator, value]"));
    }
    let name = raw[0]
        .as_str()
        .ok_or_else(|| malformed("column must be a string"))?;
    let operator: Operator = raw[1]
        .as_str()
        .ok_or_else(|| malformed("operator must be a string"))?
        .parse()?;
    let column = resolve(catalog, name)?;
    let element_type = column.column_type.element();

    let operand = if !operator.takes_operand() {
        Operand::None
    } else {
        let raw_value = match raw.get(2) {
            Some(value) if !value.is_null() => value,
            _ => {
                return Err(QueryError::InvalidConditionValue {
                    column: name.to_string(),
                    reason: format!("{} requires a value; use IS NULL or IS NOT NULL", operator),
                })
            }
        };
        match operator {
            Operator::In | Operator::NotIn => {
                let items = raw_value.as_array().ok_or_else(|| QueryError::InvalidConditionValue {
                    column: name.to_string(),
                    reason: format!("{} expects a list", operator),
                })?;
                Operand::List(
                    items
                        .iter()
                        .map(|item| coerce(name, item, element_type))
                        .collect::<Result<_, _>>()?,
                )
            }
            Operator::Like | Operator::NotLike => {
                let pattern = raw_value.as_str().ok_or_else(|| QueryError::InvalidConditionValue {
                    column: name.to_string(),
                    reason: format!("{} expects a string pattern", operator),
                })?;
                Operand::Pattern(like_to_regex(pattern).map_err(|e| {
                    QueryError::InvalidConditionValue {
                        column: name.to_string(),
                        reason: e.to_string(),
                    }
                })?)
            }
            _ => Operand::Single(coerce(name, raw_value, element_type)?),
        }
    };

    Ok(Condition {
        column,
        operator,
        operand,
    })
}

/// Coerce a JSON operand to the element type of a column
pub fn coerce(
    column: &str,
    raw: &serde_json::Value,
    column_type: ColumnType,
) -> Result<Value, QueryError> {
    use serde_json::Value as Json;

    let invalid = |expected: &str| QueryError::InvalidConditionValue {
        column: column.to_string(),
        reason: format!("expected {}, got {}", expected, raw),
    };

    if raw.is_null() {
        return Err(invalid("a non-null value"));
    }

    match column_type.scalar {
        ScalarType::String => match raw {
            Json::String(s) => Ok(Value::String(s.clone())),
            Json::Number(n) => Ok(Value::String(n.to_string())),
            _ => Err(invalid("a string")),
        },
        ScalarType::UInt => match raw {
            Json::Number(n) => n.as_u64().map(Value::UInt).ok_or_else(|| invalid("an unsigned integer")),
            Json::String(s) => s
                .trim()
                .parse::<u64>()
                .map(Value::UInt)
                .map_err(|_| invalid("an unsigned integer")),
            _ => Err(invalid("an unsigned integer")),
        },
        ScalarType::Bool => match raw {
            Json::Bool(b) => Ok(Value::Bool(*b)),
            Json::Number(n) => match n.as_u64() {
                Some(0) => Ok(Value::Bool(false)),
                Some(1) => Ok(Value::Bool(true)),
                _ => Err(invalid("a boolean")),
            },
            Json::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "1" => Ok(Value::Bool(true)),
                "false" | "0" => Ok(Value::Bool(false)),
                _ => Err(invalid("a boolean")),
            },
            _ => Err(invalid("a boolean")),
        },
        ScalarType::DateTime => match raw {
            Json::String(s) => Timestamp::parse_lenient(s)
                .map(Value::DateTime)
                .map_err(|_| invalid("a datetime")),
            Json::Number(n) => n
                .as_f64()
                .and_then(Timestamp::from_unix_seconds)
                .map(Value::DateTime)
                .ok_or_else(|| invalid("a datetime")),
            _ => Err(invalid("a datetime")),
        },
    }
}

/// Translate a SQL `LIKE` pattern (`%` and `_` wildcards) into an anchored regex
pub fn like_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut expression = String::with_capacity(pattern.len() + 8);
    expression.push_str("(?s)^");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => expression.push_str(".*"),
            '_' => expression.push('.'),
            '\\' => match chars.next() {
                Some(escaped) => expression.push_str(&regex::escape(&escaped.to_string())),
                None => expression.push_str(&regex::escape("\\")),
            },
            other => expression.push_str(&regex::escape(&other.to_string())),
        }
    }
    expression.push('$');
    Regex::new(&expression)
}

#[cfg(test)]
#[path = "query_tests.rs"]
mod tests;
