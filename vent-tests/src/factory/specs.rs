use std::fs;
use std::path::PathBuf;

use serde_json::{json, Value};

use crate::test_runner::temp_file;

/// Event spec binding `UpdateTestEvent` to the `eventtest` table, optionally
/// extended with the non-primary `category` column.
pub fn update_spec_json(with_category: bool) -> Value {
    let mut inputs = vec![
        json!({"Name": "name", "EVMType": "bytes32"}),
        json!({"Name": "description", "EVMType": "string"}),
    ];
    let mut columns = json!({
        "name": {"Name": "testname", "Primary": true, "BytesToString": true},
        "description": {"Name": "testdescription"}
    });

    if with_category {
        inputs.push(json!({"Name": "category", "EVMType": "string"}));
        columns["category"] = json!({"Name": "category"});
    }

    json!([{
        "TableName": "EventTest",
        "Filter": "EventType = 'LogEvent'",
        "Event": {"Name": "UpdateTestEvent", "Inputs": inputs},
        "Columns": columns
    }])
}

pub fn update_abi_json(with_category: bool) -> Value {
    let mut inputs = vec![
        json!({"Name": "name", "EVMType": "bytes32"}),
        json!({"Name": "description", "EVMType": "string"}),
    ];
    if with_category {
        inputs.push(json!({"Name": "category", "EVMType": "string"}));
    }

    json!([{"Name": "UpdateTestEvent", "Inputs": inputs}])
}

/// Event spec whose delete filter tombstones rows through the unprojected
/// `marker` attribute.
pub fn delete_spec_json() -> Value {
    json!([{
        "TableName": "EventTest",
        "Filter": "EventType = 'LogEvent'",
        "DeleteFilter": "marker = 'tombstone'",
        "Event": {
            "Name": "DeleteTestEvent",
            "Inputs": [
                {"Name": "name", "EVMType": "bytes32"},
                {"Name": "marker", "EVMType": "bytes32"},
                {"Name": "description", "EVMType": "string"}
            ]
        },
        "Columns": {
            "name": {"Name": "testname", "Primary": true, "BytesToString": true},
            "description": {"Name": "testdescription"}
        }
    }])
}

pub fn delete_abi_json() -> Value {
    json!([{
        "Name": "DeleteTestEvent",
        "Inputs": [
            {"Name": "name", "EVMType": "bytes32"},
            {"Name": "marker", "EVMType": "bytes32"},
            {"Name": "description", "EVMType": "string"}
        ]
    }])
}

pub fn write_json(tag: &str, name: &str, value: &Value) -> PathBuf {
    let path = temp_file(&format!("{tag}-{name}.json"));
    fs::write(&path, serde_json::to_string_pretty(value).unwrap()).unwrap();
    path
}

/// Writes the update spec and its ABI, returning `(spec_file, abi_file)`.
pub fn write_update_spec_files(tag: &str, with_category: bool) -> (PathBuf, PathBuf) {
    (
        write_json(tag, "spec", &update_spec_json(with_category)),
        write_json(tag, "abi", &update_abi_json(with_category)),
    )
}

pub fn write_delete_spec_files(tag: &str) -> (PathBuf, PathBuf) {
    (
        write_json(tag, "spec", &delete_spec_json()),
        write_json(tag, "abi", &delete_abi_json()),
    )
}
