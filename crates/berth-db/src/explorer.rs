//! Passthrough document operations for deployed applications
//!
//! The control plane proxies ad-hoc queries through the agent to the
//! per-app database. These carry no orchestration logic; the agent
//! validates the target and forwards. Collection names are checked
//! before any database call is made.

use std::time::Duration;

use berth_core::{Error, Result};
use bson::oid::ObjectId;
use bson::{doc, Bson, Document};
use futures::TryStreamExt;
use mongodb::options::{
    CreateCollectionOptions, FindOneOptions, FindOptions, UpdateOptions, ValidationLevel,
};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::client::MongoStore;

/// Safe collection name: alphanumeric start, then a limited alphabet
static SAFE_COLLECTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]{0,119}$").expect("invalid collection regex"));

const QUERY_MAX_TIME: Duration = Duration::from_secs(3);

const MAX_LIMIT: i64 = 200;
const MAX_SKIP: u64 = 10_000;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct FindRequest {
    pub collection: String,
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub projection: Option<String>,
    #[serde(default)]
    pub sort: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub skip: Option<u64>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct FindResult {
    pub returned: usize,
    pub items: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOutcome {
    pub matched_count: u64,
    pub modified_count: u64,
    pub upserted_id: Option<String>,
}

/// Reject unsafe or system collection names
pub fn validate_collection_name(name: &str) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::invalid("collection name cannot be empty"));
    }
    if !SAFE_COLLECTION_RE.is_match(name) {
        return Err(Error::invalid(
            "invalid collection name (alphanumeric, _, -, . allowed, max 120 chars)",
        ));
    }
    if name.starts_with("system.") {
        return Err(Error::invalid("access to system.* collections is forbidden"));
    }
    Ok(())
}

/// Parse a JSON string into a BSON document
fn parse_document(label: &str, json: &str) -> Result<Document> {
    let value: serde_json::Value = serde_json::from_str(json)
        .map_err(|e| Error::invalid(format!("invalid {label} JSON: {e}")))?;
    bson::to_document(&value).map_err(|e| Error::invalid(format!("{label} must be a JSON object: {e}")))
}

fn parse_optional(label: &str, json: &Option<String>) -> Result<Option<Document>> {
    match json.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => parse_document(label, s).map(Some),
    }
}

/// Document ids arrive as strings; ObjectId when it parses, plain
/// string otherwise
fn parse_id(id: &str) -> Bson {
    match ObjectId::parse_str(id) {
        Ok(oid) => Bson::ObjectId(oid),
        Err(_) => Bson::String(id.to_string()),
    }
}

fn id_to_string(id: &Bson) -> String {
    match id {
        Bson::ObjectId(oid) => oid.to_hex(),
        other => other.to_string(),
    }
}

impl MongoStore {
    pub async fn list_collections(&self, db_name: &str) -> Result<Vec<String>> {
        let mut names = self
            .database(db_name)
            .list_collection_names(None)
            .await
            .map_err(|e| Error::db(format!("list collections: {e}")))?;
        names.sort();
        Ok(names)
    }

    pub async fn find(&self, db_name: &str, req: &FindRequest) -> Result<FindResult> {
        validate_collection_name(&req.collection)?;
        let limit = req.limit.unwrap_or(50);
        if !(1..=MAX_LIMIT).contains(&limit) {
            return Err(Error::invalid(format!("limit must be in 1..={MAX_LIMIT}")));
        }
        let skip = req.skip.unwrap_or(0);
        if skip > MAX_SKIP {
            return Err(Error::invalid(format!("skip must be at most {MAX_SKIP}")));
        }
        let filter = parse_optional("filter", &req.filter)?.unwrap_or_default();
        let projection = parse_optional("projection", &req.projection)?;
        let sort = parse_optional("sort", &req.sort)?;

        let mut options = FindOptions::default();
        options.projection = projection;
        options.sort = sort;
        options.skip = Some(skip);
        options.limit = Some(limit);
        options.max_time = Some(QUERY_MAX_TIME);

        let coll = self.database(db_name).collection::<Document>(&req.collection);
        let mut cursor = coll
            .find(filter, options)
            .await
            .map_err(|e| Error::db(format!("find: {e}")))?;

        let mut items = Vec::new();
        while let Some(document) = cursor
            .try_next()
            .await
            .map_err(|e| Error::db(format!("find cursor: {e}")))?
        {
            items.push(serde_json::to_value(&document)?);
        }
        Ok(FindResult {
            returned: items.len(),
            items,
        })
    }

    pub async fn find_one_by_id(
        &self,
        db_name: &str,
        collection: &str,
        id: &str,
    ) -> Result<Option<serde_json::Value>> {
        validate_collection_name(collection)?;
        let mut options = FindOneOptions::default();
        options.max_time = Some(QUERY_MAX_TIME);
        let coll = self.database(db_name).collection::<Document>(collection);
        let document = coll
            .find_one(doc! { "_id": parse_id(id) }, options)
            .await
            .map_err(|e| Error::db(format!("find one: {e}")))?;
        document.map(|d| serde_json::to_value(&d)).transpose().map_err(Into::into)
    }

    pub async fn insert_one(
        &self,
        db_name: &str,
        collection: &str,
        doc_json: &str,
    ) -> Result<String> {
        validate_collection_name(collection)?;
        let document = parse_document("document", doc_json)?;
        if document.is_empty() {
            return Err(Error::invalid("document cannot be empty"));
        }
        let coll = self.database(db_name).collection::<Document>(collection);
        let result = coll
            .insert_one(document, None)
            .await
            .map_err(|e| Error::db(format!("insert: {e}")))?;
        Ok(id_to_string(&result.inserted_id))
    }

    pub async fn update_by_id(
        &self,
        db_name: &str,
        collection: &str,
        id: &str,
        update_json: &str,
        upsert: bool,
    ) -> Result<UpdateOutcome> {
        validate_collection_name(collection)?;
        let update = parse_document("update", update_json)?;
        if update.is_empty() {
            return Err(Error::invalid("update document cannot be empty"));
        }
        let mut options = UpdateOptions::default();
        options.upsert = Some(upsert);
        let coll = self.database(db_name).collection::<Document>(collection);
        let result = coll
            .update_one(doc! { "_id": parse_id(id) }, update, options)
            .await
            .map_err(|e| Error::db(format!("update: {e}")))?;
        Ok(UpdateOutcome {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_id: result.upserted_id.as_ref().map(id_to_string),
        })
    }

    pub async fn delete_by_id(&self, db_name: &str, collection: &str, id: &str) -> Result<u64> {
        validate_collection_name(collection)?;
        let coll = self.database(db_name).collection::<Document>(collection);
        let result = coll
            .delete_one(doc! { "_id": parse_id(id) }, None)
            .await
            .map_err(|e| Error::db(format!("delete: {e}")))?;
        Ok(result.deleted_count)
    }

    pub async fn create_collection(
        &self,
        db_name: &str,
        collection: &str,
        strict: bool,
        fields_json: &Option<String>,
    ) -> Result<()> {
        validate_collection_name(collection)?;
        let db = self.database(db_name);
        let existing = db
            .list_collection_names(None)
            .await
            .map_err(|e| Error::db(format!("list collections: {e}")))?;
        if existing.iter().any(|c| c == collection) {
            return Err(Error::invalid(format!(
                "collection '{collection}' already exists"
            )));
        }

        let mut options = CreateCollectionOptions::default();
        if strict {
            if let Some(schema) = parse_optional("fields", fields_json)? {
                options.validator = Some(doc! { "$jsonSchema": schema });
                options.validation_level = Some(ValidationLevel::Strict);
            }
        }
        db.create_collection(collection, options)
            .await
            .map_err(|e| Error::db(format!("create collection: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_name_validation() {
        assert!(validate_collection_name("users").is_ok());
        assert!(validate_collection_name("app.events-2024").is_ok());
        assert!(validate_collection_name("").is_err());
        assert!(validate_collection_name(".hidden").is_err());
        assert!(validate_collection_name("system.indexes").is_err());
        assert!(validate_collection_name("bad name").is_err());
        assert!(validate_collection_name(&"a".repeat(121)).is_err());
    }

    #[test]
    fn test_parse_id_object_id_or_string() {
        let oid = "65f0c2b7a1b2c3d4e5f60718";
        assert!(matches!(parse_id(oid), Bson::ObjectId(_)));
        assert!(matches!(parse_id("user-42"), Bson::String(_)));
    }

    #[test]
    fn test_parse_document_rejects_non_object() {
        assert!(parse_document("filter", "[1,2]").is_err());
        assert!(parse_document("filter", "not json").is_err());
        let doc = parse_document("filter", r#"{"a": 1}"#).unwrap();
        assert_eq!(doc.get_i64("a").unwrap(), 1);
    }

    #[test]
    fn test_id_round_trip_string() {
        let oid = ObjectId::parse_str("65f0c2b7a1b2c3d4e5f60718").unwrap();
        assert_eq!(id_to_string(&Bson::ObjectId(oid)), "65f0c2b7a1b2c3d4e5f60718");
    }
}
