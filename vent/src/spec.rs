use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use derive_more::Display;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::abi::EventDecl;
use crate::query::{Query, QueryError};
use crate::tables;
use crate::tables::{SqlTable, SqlTableColumn};

const SPEC_EXTENSION: &str = "json";
const MAX_NAME_LENGTH: usize = 60;

/// One record of the declarative event specification: which ABI event lands
/// in which table, filtered how, with which column projection.
#[derive(Clone, Debug, Deserialize)]
pub struct EventDefinition {
    #[serde(rename = "TableName")]
    pub table_name: String,
    #[serde(rename = "Filter")]
    pub filter: String,
    #[serde(rename = "DeleteFilter", default)]
    pub delete_filter: Option<String>,
    #[serde(rename = "Event")]
    pub event: EventDecl,
    #[serde(rename = "Columns")]
    pub columns: HashMap<String, ColumnSpec>,
}

/// Target column descriptor for one ABI input.
#[derive(Clone, Debug, Deserialize)]
pub struct ColumnSpec {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Primary", default)]
    pub primary: bool,
    #[serde(rename = "BytesToString", default)]
    pub bytes_to_string: bool,
}

/// Parsed `attr = 'literal'` pair: a matching decoded record is deleted
/// instead of upserted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeleteFilter {
    pub attr: String,
    pub value: String,
}

impl DeleteFilter {
    pub fn parse(input: &str) -> Result<DeleteFilter, SpecError> {
        let malformed = || SpecError::InvalidDeleteFilter(input.to_string());
        let (attr, value) = input.split_once('=').ok_or_else(malformed)?;
        let attr = attr.trim();
        let value = value.trim().trim_matches('\'');

        if attr.is_empty() || value.is_empty() {
            return Err(malformed());
        }

        Ok(DeleteFilter {
            attr: attr.to_string(),
            value: value.to_string(),
        })
    }
}

/// Where a declarative input comes from: a single file or a directory whose
/// recognized files are concatenated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpecSource {
    File(PathBuf),
    Dir(PathBuf),
}

/// Runtime form of one event definition after validation: the parsed filter,
/// the parsed delete filter and the index of the target table.
#[derive(Clone, Debug)]
pub struct EventProjection {
    pub event_name: String,
    pub table_name: String,
    pub table_index: usize,
    pub query: Query,
    pub delete_filter: Option<DeleteFilter>,
}

/// The schema plan plus the per-event projections, both in declaration order.
#[derive(Debug, Default)]
pub struct Projection {
    pub tables: Vec<SqlTable>,
    pub events: Vec<EventProjection>,
}

#[derive(Debug, Display)]
pub enum SpecError {
    #[display(fmt = "error reading {}: {}", path, message)]
    Io { path: String, message: String },
    #[display(fmt = "error parsing {}: {}", path, message)]
    Parse { path: String, message: String },
    #[display(fmt = "table name must be 1 to 60 characters: '{}'", _0)]
    BadTableName(String),
    #[display(fmt = "table name '{}' uses the reserved prefix", _0)]
    ReservedTableName(String),
    #[display(fmt = "event definition for table '{}' has an empty column map", _0)]
    EmptyColumns(String),
    #[display(fmt = "column name must be 1 to 60 characters: '{}'", _0)]
    BadColumnName(String),
    #[display(fmt = "duplicated table name: {}", _0)]
    DuplicateTable(String),
    #[display(fmt = "duplicated column name: {} in table {}", column, table)]
    DuplicateColumn { table: String, column: String },
    #[display(fmt = "column orders of table '{}' are not dense", _0)]
    NonDenseOrder(String),
    #[display(fmt = "event name is required")]
    MissingEventName,
    #[display(fmt = "event '{}' declares no inputs", _0)]
    NoEventInputs(String),
    #[display(fmt = "no mapping onto the column lattice for EVM type: {}", _0)]
    UnmappedEvmType(String),
    #[display(fmt = "invalid filter for table '{}': {}", table, source)]
    InvalidFilter { table: String, source: QueryError },
    #[display(fmt = "invalid delete filter: {}", _0)]
    InvalidDeleteFilter(String),
    #[display(fmt = "duplicated event id for event '{}'", _0)]
    DuplicateEventId(String),
}

/// Loads and validates an event specification, returning the runtime
/// projection. Happens entirely before any database connection is opened.
pub fn load(source: &SpecSource, db_block_tx: bool) -> Result<Projection, SpecError> {
    let definitions: Vec<EventDefinition> = collect(source)?;
    Projection::build(&definitions, db_block_tx)
}

impl Projection {
    pub fn build(
        definitions: &[EventDefinition],
        db_block_tx: bool,
    ) -> Result<Projection, SpecError> {
        let mut projection = Projection::default();

        for definition in definitions {
            let table = build_table(definition)?;

            if projection.tables.iter().any(|existing| existing.name == table.name) {
                return Err(SpecError::DuplicateTable(table.name));
            }

            projection.events.push(EventProjection {
                event_name: definition.event.name.clone(),
                table_name: table.name.clone(),
                table_index: projection.tables.len(),
                query: Query::parse(&definition.filter).map_err(|source| {
                    SpecError::InvalidFilter {
                        table: table.name.clone(),
                        source,
                    }
                })?,
                delete_filter: definition
                    .delete_filter
                    .as_deref()
                    .map(DeleteFilter::parse)
                    .transpose()?,
            });
            projection.tables.push(table);
        }

        if db_block_tx {
            projection.tables.push(tables::block_table());
            projection.tables.push(tables::tx_table());
        }

        Ok(projection)
    }

    pub fn table(&self, event: &EventProjection) -> &SqlTable {
        &self.tables[event.table_index]
    }

    /// Filter expressions in declaration order, handed to the block stream.
    pub fn filters(&self) -> Vec<String> {
        self.tables
            .iter()
            .filter(|table| !table.filter.is_empty())
            .map(|table| table.filter.clone())
            .collect()
    }
}

fn build_table(definition: &EventDefinition) -> Result<SqlTable, SpecError> {
    let table_name = definition.table_name.to_lowercase();

    if table_name.is_empty() || table_name.len() > MAX_NAME_LENGTH {
        return Err(SpecError::BadTableName(definition.table_name.clone()));
    }
    if table_name.starts_with(tables::RESERVED_TABLE_PREFIX) {
        return Err(SpecError::ReservedTableName(table_name));
    }
    if definition.columns.is_empty() {
        return Err(SpecError::EmptyColumns(table_name));
    }

    // Resolving the event validates its name, inputs and every EVM type.
    definition.event.to_abi_event()?;

    let mut columns: HashMap<String, SqlTableColumn> = tables::global_columns().into_iter().collect();
    let mut order = columns.len() as u32;

    for input in &definition.event.inputs {
        let Some(column) = definition.columns.get(&input.name) else {
            continue;
        };

        let column_name = column.name.to_lowercase();
        if column_name.is_empty() || column_name.len() > MAX_NAME_LENGTH {
            return Err(SpecError::BadColumnName(column.name.clone()));
        }

        let param = crate::abi::parse_evm_type(&input.evm_type)?;
        let (column_type, length) = tables::column_type_for(&param, column.bytes_to_string)
            .ok_or_else(|| SpecError::UnmappedEvmType(input.evm_type.clone()))?;

        order += 1;
        columns.insert(
            input.name.clone(),
            SqlTableColumn {
                name: column_name,
                column_type,
                length,
                primary: column.primary,
                order,
                bytes_to_string: column.bytes_to_string,
            },
        );
    }

    check_duplicate_columns(&table_name, &columns)?;
    check_dense_orders(&table_name, &columns)?;

    Ok(SqlTable {
        name: table_name,
        event_name: definition.event.name.clone(),
        filter: definition.filter.clone(),
        columns,
    })
}

fn check_duplicate_columns(
    table_name: &str,
    columns: &HashMap<String, SqlTableColumn>,
) -> Result<(), SpecError> {
    let mut seen: HashMap<&str, u32> = HashMap::new();

    for column in columns.values() {
        let count = seen.entry(column.name.as_str()).or_insert(0);
        *count += 1;
        if *count > 1 {
            return Err(SpecError::DuplicateColumn {
                table: table_name.to_string(),
                column: column.name.clone(),
            });
        }
    }

    Ok(())
}

fn check_dense_orders(
    table_name: &str,
    columns: &HashMap<String, SqlTableColumn>,
) -> Result<(), SpecError> {
    let mut orders: Vec<u32> = columns.values().map(|column| column.order).collect();
    orders.sort_unstable();

    let dense = orders.iter().enumerate().all(|(i, order)| *order == i as u32 + 1);
    if !dense {
        return Err(SpecError::NonDenseOrder(table_name.to_string()));
    }

    Ok(())
}

/// Reads one file, or every recognized file of a directory in name order,
/// concatenating the parsed collections.
pub(crate) fn collect<T: DeserializeOwned>(source: &SpecSource) -> Result<Vec<T>, SpecError> {
    match source {
        SpecSource::File(path) => parse_file(path),
        SpecSource::Dir(path) => {
            let mut entries: Vec<PathBuf> = fs::read_dir(path)
                .map_err(|err| io_error(path, err))?
                .filter_map(|entry| entry.ok().map(|entry| entry.path()))
                .filter(|path| {
                    path.extension().and_then(|extension| extension.to_str())
                        == Some(SPEC_EXTENSION)
                })
                .collect();
            entries.sort();

            let mut collected = Vec::new();
            for entry in entries {
                collected.extend(parse_file(&entry)?);
            }
            Ok(collected)
        }
    }
}

fn parse_file<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, SpecError> {
    let contents = fs::read_to_string(path).map_err(|err| io_error(path, err))?;

    serde_json::from_str(&contents).map_err(|err| SpecError::Parse {
        path: path.display().to_string(),
        message: err.to_string(),
    })
}

fn io_error(path: &Path, err: std::io::Error) -> SpecError {
    SpecError::Io {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::InputDecl;
    use crate::tables::SqlColumnType;

    fn test_definition() -> EventDefinition {
        serde_json::from_str(
            r#"{
                "TableName": "EventTest",
                "Filter": "EventType = 'LogEvent'",
                "Event": {
                    "Name": "UpdateTestEvent",
                    "Inputs": [
                        {"Name": "name", "EVMType": "bytes32"},
                        {"Name": "description", "EVMType": "string"}
                    ]
                },
                "Columns": {
                    "name": {"Name": "testname", "Primary": true, "BytesToString": true},
                    "description": {"Name": "testdescription"}
                }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn builds_tables_with_merged_global_columns() {
        let projection = Projection::build(&[test_definition()], false).unwrap();

        assert_eq!(projection.tables.len(), 1);
        let table = &projection.tables[0];
        assert_eq!(table.name, "eventtest");
        assert_eq!(table.event_name, "UpdateTestEvent");
        assert_eq!(table.columns.len(), 7);

        let name_column = table.column_for_field("name").unwrap();
        assert_eq!(name_column.name, "testname");
        assert_eq!(name_column.column_type, SqlColumnType::Varchar);
        assert_eq!(name_column.length, 40);
        assert!(name_column.primary);
        assert!(name_column.bytes_to_string);
        assert_eq!(name_column.order, 6);

        let description_column = table.column_for_field("description").unwrap();
        assert_eq!(description_column.column_type, SqlColumnType::Text);
        assert_eq!(description_column.order, 7);
    }

    #[test]
    fn projection_events_reference_their_tables() {
        let projection = Projection::build(&[test_definition()], false).unwrap();
        let event = &projection.events[0];

        assert_eq!(projection.table(event).name, "eventtest");
        assert!(!event.query.is_empty());
        assert_eq!(event.delete_filter, None);
    }

    #[test]
    fn block_tx_capture_extends_the_plan() {
        let projection = Projection::build(&[test_definition()], true).unwrap();
        let names: Vec<&str> =
            projection.tables.iter().map(|table| table.name.as_str()).collect();

        assert_eq!(names, vec!["eventtest", "_vent_block", "_vent_tx"]);
        assert_eq!(projection.events.len(), 1);
    }

    #[test]
    fn rejects_duplicate_table_names() {
        let result = Projection::build(&[test_definition(), test_definition()], false);
        assert!(matches!(result, Err(SpecError::DuplicateTable(_))));
    }

    #[test]
    fn rejects_bad_table_names() {
        let mut definition = test_definition();
        definition.table_name = String::new();
        assert!(matches!(
            Projection::build(&[definition], false),
            Err(SpecError::BadTableName(_))
        ));

        let mut definition = test_definition();
        definition.table_name = "x".repeat(61);
        assert!(matches!(
            Projection::build(&[definition], false),
            Err(SpecError::BadTableName(_))
        ));

        let mut definition = test_definition();
        definition.table_name = "_vent_custom".to_string();
        assert!(matches!(
            Projection::build(&[definition], false),
            Err(SpecError::ReservedTableName(_))
        ));
    }

    #[test]
    fn rejects_empty_column_maps() {
        let mut definition = test_definition();
        definition.columns.clear();

        assert!(matches!(
            Projection::build(&[definition], false),
            Err(SpecError::EmptyColumns(_))
        ));
    }

    #[test]
    fn rejects_columns_shadowing_global_columns() {
        let mut definition = test_definition();
        definition.columns.get_mut("name").unwrap().name = "_height".to_string();

        assert!(matches!(
            Projection::build(&[definition], false),
            Err(SpecError::DuplicateColumn { .. })
        ));
    }

    #[test]
    fn rejects_duplicate_column_names() {
        let mut definition = test_definition();
        definition.columns.get_mut("description").unwrap().name = "testname".to_string();

        assert!(matches!(
            Projection::build(&[definition], false),
            Err(SpecError::DuplicateColumn { .. })
        ));
    }

    #[test]
    fn rejects_unmapped_evm_types_before_any_connection() {
        let mut definition = test_definition();
        definition.event.inputs.push(InputDecl {
            name: "description".to_string(),
            evm_type: "fixed128x18".to_string(),
            indexed: false,
        });

        assert!(matches!(
            Projection::build(&[definition], false),
            Err(SpecError::UnmappedEvmType(_))
        ));
    }

    #[test]
    fn rejects_unparseable_filters() {
        let mut definition = test_definition();
        definition.filter = "EventType = LogEvent".to_string();

        assert!(matches!(
            Projection::build(&[definition], false),
            Err(SpecError::InvalidFilter { .. })
        ));
    }

    #[test]
    fn missing_filter_fails_deserialization() {
        let result: Result<EventDefinition, _> = serde_json::from_str(
            r#"{
                "TableName": "EventTest",
                "Event": {"Name": "E", "Inputs": [{"Name": "n", "EVMType": "string"}]},
                "Columns": {"n": {"Name": "n"}}
            }"#,
        );

        assert!(result.is_err());
    }

    #[test]
    fn parses_delete_filters() {
        assert_eq!(
            DeleteFilter::parse("name = 'tombstone'").unwrap(),
            DeleteFilter {
                attr: "name".to_string(),
                value: "tombstone".to_string(),
            }
        );
        assert!(DeleteFilter::parse("name").is_err());
        assert!(DeleteFilter::parse("= 'x'").is_err());
        assert!(DeleteFilter::parse("name = ''").is_err());
    }

    #[test]
    fn unmatched_column_keys_are_ignored() {
        let mut definition = test_definition();
        definition.columns.insert(
            "missing_input".to_string(),
            ColumnSpec {
                name: "missing".to_string(),
                primary: false,
                bytes_to_string: false,
            },
        );

        let projection = Projection::build(&[definition], false).unwrap();
        assert_eq!(projection.tables[0].columns.len(), 7);
    }
}
