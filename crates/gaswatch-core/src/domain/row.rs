//! Rows and fetch results
//!
//! Rows are schemaless JSON objects. Every row returned by a backend
//! adapter carries the unique identifier field [`ID_FIELD`].

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Name of the unique identifier field present on every row
pub const ID_FIELD: &str = "id";

/// Name of the creation timestamp field present on every row
pub const CREATED_AT_FIELD: &str = "created_at";

/// A single row as returned by the backend
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Returns the identifier of a row, if it has a string `id`
pub fn row_id(row: &Row) -> Option<&str> {
    row.get(ID_FIELD).and_then(serde_json::Value::as_str)
}

/// Result of one point-in-time read
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Result set of a collection read (possibly empty)
    Rows(Vec<Row>),
    /// A point read found its row
    Document(Row),
    /// A point read found nothing; not a failure
    Absent,
}

impl FetchOutcome {
    /// Converts into the data slot of a sync state
    pub fn into_data(self) -> Option<QueryData> {
        match self {
            FetchOutcome::Rows(rows) => Some(QueryData::Rows(rows)),
            FetchOutcome::Document(row) => Some(QueryData::Document(row)),
            FetchOutcome::Absent => None,
        }
    }
}

/// Data held by a ready live query
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryData {
    Rows(Vec<Row>),
    Document(Row),
}

impl QueryData {
    /// Rows of a collection result; a document result yields one row
    pub fn rows(&self) -> &[Row] {
        match self {
            QueryData::Rows(rows) => rows,
            QueryData::Document(row) => std::slice::from_ref(row),
        }
    }

    /// Decodes every row into `T`
    pub fn decode_rows<T: DeserializeOwned>(&self) -> serde_json::Result<Vec<T>> {
        self.rows()
            .iter()
            .map(|row| serde_json::from_value(serde_json::Value::Object(row.clone())))
            .collect()
    }

    /// Decodes a document result into `T`; `None` for collection results
    pub fn decode_document<T: DeserializeOwned>(&self) -> serde_json::Result<Option<T>> {
        match self {
            QueryData::Document(row) => {
                serde_json::from_value(serde_json::Value::Object(row.clone())).map(Some)
            }
            QueryData::Rows(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Device {
        id: String,
        name: String,
        ppm: Option<f64>,
    }

    fn row(value: serde_json::Value) -> Row {
        match value {
            serde_json::Value::Object(map) => map,
            _ => unreachable!("test rows are objects"),
        }
    }

    #[test]
    fn test_absent_has_no_data() {
        assert_eq!(FetchOutcome::Absent.into_data(), None);
        assert_eq!(
            FetchOutcome::Rows(vec![]).into_data(),
            Some(QueryData::Rows(vec![]))
        );
    }

    #[test]
    fn test_decode_rows() {
        let data = QueryData::Rows(vec![
            row(json!({"id": "d1", "name": "Kitchen", "ppm": 12.5})),
            row(json!({"id": "d2", "name": "Garage", "ppm": null})),
        ]);

        let devices: Vec<Device> = data.decode_rows().unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].name, "Kitchen");
        assert_eq!(devices[1].ppm, None);
    }

    #[test]
    fn test_decode_document() {
        let data = QueryData::Document(row(json!({"id": "d1", "name": "Kitchen"})));
        let device: Option<Device> = data.decode_document().unwrap();
        assert_eq!(device.unwrap().id, "d1");
        assert_eq!(row_id(&data.rows()[0]), Some("d1"));

        let list = QueryData::Rows(vec![]);
        assert_eq!(list.decode_document::<Device>().unwrap(), None);
    }
}
