//! Column catalog of the events dataset.
//!
//! Scalar columns hold one value per event. Nested columns are grouped by
//! the prefix before the dot (`exception_stacks.type` belongs to
//! `exception_stacks`) and hold one array per event; every member of a
//! nested group has the same array length for a given event.

use std::fmt;

/// Element type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    String,
    UInt,
    Bool,
    DateTime,
}

impl ScalarType {
    fn storage_name(&self) -> &'static str {
        match self {
            Self::String => "String",
            Self::UInt => "UInt64",
            Self::Bool => "UInt8",
            Self::DateTime => "DateTime",
        }
    }
}

/// Full type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnType {
    pub scalar: ScalarType,
    pub nullable: bool,
    pub array: bool,
}

impl ColumnType {
    const fn scalar(scalar: ScalarType) -> Self {
        Self {
            scalar,
            nullable: false,
            array: false,
        }
    }

    const fn nullable(scalar: ScalarType) -> Self {
        Self {
            scalar,
            nullable: true,
            array: false,
        }
    }

    const fn array_of(element: ColumnType) -> Self {
        Self {
            scalar: element.scalar,
            nullable: element.nullable,
            array: true,
        }
    }

    /// Type of a single element (the type itself for scalar columns)
    pub fn element(&self) -> ColumnType {
        Self {
            array: false,
            ..*self
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut name = self.scalar.storage_name().to_string();
        if self.nullable {
            name = format!("Nullable({})", name);
        }
        if self.array {
            name = format!("Array({})", name);
        }
        write!(f, "{}", name)
    }
}

/// Definition of one column in the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    /// Position in storage order
    pub index: usize,
    pub name: &'static str,
    pub column_type: ColumnType,
    /// Nested group for array columns
    pub nested: Option<&'static str>,
}

impl ColumnDef {
    const fn new(index: usize, name: &'static str, column_type: ColumnType) -> Self {
        Self {
            index,
            name,
            column_type,
            nested: None,
        }
    }

    const fn nested(
        index: usize,
        nested: &'static str,
        name: &'static str,
        element: ColumnType,
    ) -> Self {
        Self {
            index,
            name,
            column_type: ColumnType::array_of(element),
            nested: Some(nested),
        }
    }

    pub fn is_array(&self) -> bool {
        self.column_type.array
    }
}

pub const TAGS: &str = "tags";
pub const EXCEPTION_STACKS: &str = "exception_stacks";
pub const EXCEPTION_FRAMES: &str = "exception_frames";

const STRING: ColumnType = ColumnType::scalar(ScalarType::String);
const NULLABLE_STRING: ColumnType = ColumnType::nullable(ScalarType::String);
const NULLABLE_UINT: ColumnType = ColumnType::nullable(ScalarType::UInt);
const NULLABLE_BOOL: ColumnType = ColumnType::nullable(ScalarType::Bool);

const EVENT_COLUMNS: &[ColumnDef] = &[
    ColumnDef::new(0, "event_id", STRING),
    ColumnDef::new(1, "project_id", ColumnType::scalar(ScalarType::UInt)),
    ColumnDef::new(2, "timestamp", ColumnType::scalar(ScalarType::DateTime)),
    ColumnDef::new(3, "received", ColumnType::scalar(ScalarType::DateTime)),
    ColumnDef::new(4, "message", STRING),
    ColumnDef::new(5, "platform", STRING),
    ColumnDef::new(6, "primary_hash", STRING),
    ColumnDef::new(7, "culprit", NULLABLE_STRING),
    ColumnDef::new(8, "user_id", NULLABLE_STRING),
    ColumnDef::new(9, "username", NULLABLE_STRING),
    ColumnDef::new(10, "email", NULLABLE_STRING),
    ColumnDef::new(11, "ip_address", NULLABLE_STRING),
    ColumnDef::nested(12, TAGS, "tags.key", STRING),
    ColumnDef::nested(13, TAGS, "tags.value", STRING),
    ColumnDef::nested(14, EXCEPTION_STACKS, "exception_stacks.type", NULLABLE_STRING),
    ColumnDef::nested(15, EXCEPTION_STACKS, "exception_stacks.value", NULLABLE_STRING),
    ColumnDef::nested(
        16,
        EXCEPTION_STACKS,
        "exception_stacks.mechanism_type",
        NULLABLE_STRING,
    ),
    ColumnDef::nested(
        17,
        EXCEPTION_STACKS,
        "exception_stacks.mechanism_handled",
        NULLABLE_BOOL,
    ),
    ColumnDef::nested(18, EXCEPTION_FRAMES, "exception_frames.abs_path", NULLABLE_STRING),
    ColumnDef::nested(19, EXCEPTION_FRAMES, "exception_frames.filename", NULLABLE_STRING),
    ColumnDef::nested(20, EXCEPTION_FRAMES, "exception_frames.function", NULLABLE_STRING),
    ColumnDef::nested(21, EXCEPTION_FRAMES, "exception_frames.module", NULLABLE_STRING),
    ColumnDef::nested(22, EXCEPTION_FRAMES, "exception_frames.lineno", NULLABLE_UINT),
    ColumnDef::nested(23, EXCEPTION_FRAMES, "exception_frames.colno", NULLABLE_UINT),
    ColumnDef::nested(24, EXCEPTION_FRAMES, "exception_frames.in_app", NULLABLE_BOOL),
    ColumnDef::nested(
        25,
        EXCEPTION_FRAMES,
        "exception_frames.stack_level",
        ColumnType::scalar(ScalarType::UInt),
    ),
];

/// Lookup table over the events dataset columns
#[derive(Debug, Clone, Copy, Default)]
pub struct ColumnCatalog;

impl ColumnCatalog {
    /// Find a column by its public name
    pub fn get(&self, name: &str) -> Option<&'static ColumnDef> {
        EVENT_COLUMNS.iter().find(|column| column.name == name)
    }

    /// All columns in storage order
    pub fn columns(&self) -> &'static [ColumnDef] {
        EVENT_COLUMNS
    }

    /// Columns belonging to one nested group
    pub fn nested_members<'a>(
        &self,
        nested: &'a str,
    ) -> impl Iterator<Item = &'static ColumnDef> + 'a {
        EVENT_COLUMNS
            .iter()
            .filter(move |column| column.nested == Some(nested))
    }
}

#[cfg(test)]
#[path = "columns_tests.rs"]
mod tests;
