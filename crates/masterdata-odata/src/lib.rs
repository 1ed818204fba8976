// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

mod binding;

pub use binding::ODataBinding;

use anyhow::{Context, Result, anyhow, bail};
use masterdata_app::{
    BatchOp, EdmType, FieldValue, PropertyDescriptor, RowData, TableKind, format_key_literal,
};
use reqwest::StatusCode;
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const ON_BEHALF_OF_HEADER: &str = "X-onbehalfof-User";

/// Blocking client for an OData v4 service root.
#[derive(Debug, Clone)]
pub struct Client {
    base_url: String,
    user: Option<String>,
    timeout: Duration,
    http: HttpClient,
}

impl Client {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_owned();
        if base_url.is_empty() {
            bail!("service.base_url must not be empty");
        }
        let parsed = Url::parse(&base_url)
            .with_context(|| format!("service.base_url {base_url:?} is not a valid URL"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            bail!(
                "service.base_url must use http or https, got {}:// -- fix it in the config file",
                parsed.scheme()
            );
        }

        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("build HTTP client")?;

        Ok(Self {
            base_url,
            user: None,
            timeout,
            http,
        })
    }

    /// Sends every request on behalf of `user`.
    pub fn with_user(mut self, user: &str) -> Self {
        let user = user.trim();
        self.user = (!user.is_empty()).then(|| user.to_owned());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn ping(&self) -> Result<()> {
        let response = self.send(self.http.get(format!("{}/", self.base_url)))?;
        let _: Value = response.json().context("decode service document")?;
        Ok(())
    }

    /// Properties of the entity type behind `table`, from CSDL JSON metadata.
    pub fn fetch_properties(&self, table: TableKind) -> Result<Vec<PropertyDescriptor>> {
        let response = self.send(
            self.http
                .get(format!("{}/$metadata", self.base_url))
                .query(&[("$format", "json")]),
        )?;
        let document: Value = response.json().context("decode service metadata")?;
        properties_from_csdl(&document, table.entity_set())
    }

    pub fn list(&self, table: TableKind, properties: &[PropertyDescriptor]) -> Result<Vec<RowData>> {
        let response = self.send(
            self.http
                .get(format!("{}/{}", self.base_url, table.entity_set()))
                .query(&[("$count", "true")]),
        )?;
        let page: CollectionPage = response
            .json()
            .with_context(|| format!("decode {table} list"))?;
        if let Some(count) = page.count
            && usize::try_from(count).ok() != Some(page.value.len())
        {
            debug!(%table, count, loaded = page.value.len(), "service paged the list");
        }
        page.value
            .iter()
            .map(|entity| decode_row(entity, properties))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("decode {table} rows"))
    }

    pub fn next_customer_id(&self) -> Result<String> {
        let response = self.send(
            self.http
                .post(format!("{}/GetNextCustomerId", self.base_url))
                .json(&json!({})),
        )?;
        let parsed: ActionResult = response.json().context("decode next customer id")?;
        parsed
            .value
            .as_str()
            .map(str::to_owned)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| anyhow!("GetNextCustomerId returned {} instead of an id", parsed.value))
    }

    /// Sends `ops` as one JSON batch. The outer result fails when the batch
    /// as a whole fails; the inner results carry per-request rejections.
    pub fn submit_batch(&self, table: TableKind, ops: &[BatchOp]) -> Result<Vec<Result<(), String>>> {
        if ops.is_empty() {
            return Ok(Vec::new());
        }
        let request = BatchRequest {
            requests: ops
                .iter()
                .enumerate()
                .map(|(index, op)| batch_part(table, index, op))
                .collect(),
        };
        debug!(%table, parts = request.requests.len(), "submitting batch");
        let response = self.send(
            self.http
                .post(format!("{}/$batch", self.base_url))
                .json(&request),
        )?;
        let parsed: BatchResponse = response.json().context("decode batch response")?;

        let mut by_id: BTreeMap<String, BatchResponsePart> = parsed
            .responses
            .into_iter()
            .map(|part| (part.id.clone(), part))
            .collect();
        let results = (0..ops.len())
            .map(|index| match by_id.remove(&part_id(index)) {
                Some(part) if (200..300).contains(&part.status) => Ok(()),
                Some(part) => Err(part
                    .body
                    .as_ref()
                    .and_then(extract_error_message)
                    .unwrap_or_else(|| format!("request failed with status {}", part.status))),
                None => Err("no response for this request".to_owned()),
            })
            .collect();
        Ok(results)
    }

    fn send(&self, request: RequestBuilder) -> Result<Response> {
        let request = match &self.user {
            Some(user) => request.header(ON_BEHALF_OF_HEADER, user),
            None => request,
        };
        let response = request
            .send()
            .map_err(|error| connection_error(&self.base_url, error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(clean_error_response(status, &body));
        }
        Ok(response)
    }
}

/// Reads the properties of the entity type behind `entity_set` from a CSDL
/// JSON document. Navigation properties are skipped.
pub fn properties_from_csdl(document: &Value, entity_set: &str) -> Result<Vec<PropertyDescriptor>> {
    let container_name = document
        .get("$EntityContainer")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("metadata has no $EntityContainer"))?;
    let container = lookup_qualified(document, container_name)
        .ok_or_else(|| anyhow!("metadata has no container {container_name}"))?;
    let type_name = container
        .get(entity_set)
        .and_then(|set| set.get("$Type"))
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("metadata has no entity set {entity_set}"))?;
    let entity_type = lookup_qualified(document, type_name)
        .and_then(Value::as_object)
        .ok_or_else(|| anyhow!("metadata has no entity type {type_name}"))?;

    let keys: Vec<&str> = entity_type
        .get("$Key")
        .and_then(Value::as_array)
        .map(|keys| keys.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut properties = Vec::new();
    for (name, member) in entity_type {
        if name.starts_with('$') {
            continue;
        }
        let kind = member.get("$Kind").and_then(Value::as_str).unwrap_or("Property");
        if kind != "Property" {
            continue;
        }
        let edm_type = member
            .get("$Type")
            .and_then(Value::as_str)
            .map_or(EdmType::String, EdmType::parse);
        let mut property = PropertyDescriptor::new(name, edm_type);
        if member.get("$Nullable").and_then(Value::as_bool) == Some(false) {
            property = property.required();
        }
        if keys.contains(&name.as_str()) {
            property = property.key();
        }
        properties.push(property);
    }
    if properties.is_empty() {
        bail!("entity type {type_name} has no properties");
    }
    Ok(properties)
}

fn lookup_qualified<'a>(document: &'a Value, qualified: &str) -> Option<&'a Value> {
    let (namespace, name) = qualified.rsplit_once('.')?;
    document.get(namespace)?.get(name)
}

/// Error text from an OData error body, in the shapes services commonly use.
pub fn extract_error_message(body: &Value) -> Option<String> {
    let candidates = [
        body.pointer("/error/message"),
        body.pointer("/error/message/value"),
        body.get("message"),
        body.get("Message"),
    ];
    candidates
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|message| !message.is_empty())
        .map(str::to_owned)
}

pub fn encode_row(data: &RowData) -> Value {
    data.to_json()
}

/// Decodes one entity. Fields missing from `properties` keep their JSON
/// shape; `@odata` annotations are dropped.
pub fn decode_row(entity: &Value, properties: &[PropertyDescriptor]) -> Result<RowData> {
    let fields = entity
        .as_object()
        .ok_or_else(|| anyhow!("entity is not a JSON object"))?;
    let mut row = RowData::new();
    for (name, raw) in fields {
        if name.contains('@') {
            continue;
        }
        let edm_type = properties
            .iter()
            .find(|property| &property.name == name)
            .map(|property| property.edm_type);
        let value = decode_value(raw, edm_type).with_context(|| format!("field {name}"))?;
        row.set(name, value);
    }
    Ok(row)
}

fn decode_value(raw: &Value, edm_type: Option<EdmType>) -> Result<FieldValue> {
    let value = match (raw, edm_type) {
        (Value::Null, _) => FieldValue::Null,
        (Value::Bool(flag), _) => FieldValue::Bool(*flag),
        (Value::Number(number), Some(EdmType::Decimal | EdmType::Double)) => number
            .as_f64()
            .map(FieldValue::Decimal)
            .ok_or_else(|| anyhow!("number {number} out of range"))?,
        (Value::Number(number), _) => match number.as_i64() {
            Some(integer) => FieldValue::Integer(integer),
            None => number
                .as_f64()
                .map(FieldValue::Decimal)
                .ok_or_else(|| anyhow!("number {number} out of range"))?,
        },
        (Value::String(text), Some(edm_type)) => edm_type.parse_value(text)?,
        (Value::String(text), None) => FieldValue::Text(text.clone()),
        (Value::Array(_) | Value::Object(_), _) => bail!("nested values are not supported"),
    };
    Ok(value)
}

fn batch_part(table: TableKind, index: usize, op: &BatchOp) -> BatchRequestPart {
    let set = table.entity_set();
    let (method, url, body) = match op {
        BatchOp::Create { data, .. } => ("POST", set.to_owned(), Some(encode_row(data))),
        BatchOp::Update { key, changes, .. } => (
            "PATCH",
            format!("{set}({})", format_key_literal(key)),
            Some(encode_row(changes)),
        ),
        BatchOp::Delete { key, .. } => ("DELETE", format!("{set}({})", format_key_literal(key)), None),
    };
    let headers = body.as_ref().map(|_| {
        BTreeMap::from([("content-type".to_owned(), "application/json".to_owned())])
    });
    BatchRequestPart {
        id: part_id(index),
        method,
        url,
        headers,
        body,
    }
}

fn part_id(index: usize) -> String {
    (index + 1).to_string()
}

fn connection_error(base_url: &str, error: reqwest::Error) -> anyhow::Error {
    anyhow!(
        "cannot reach {} -- check service.base_url and that the service is running ({})",
        base_url,
        error
    )
}

fn clean_error_response(status: StatusCode, body: &str) -> anyhow::Error {
    if let Ok(parsed) = serde_json::from_str::<Value>(body)
        && let Some(message) = extract_error_message(&parsed)
    {
        return anyhow!("server error ({}): {}", status.as_u16(), message);
    }

    if body.len() < 100 && !body.contains('{') && !body.trim().is_empty() {
        return anyhow!("server error ({}): {}", status.as_u16(), body.trim());
    }

    anyhow!("server returned {}", status.as_u16())
}

#[derive(Debug, Deserialize)]
struct CollectionPage {
    #[serde(rename = "@odata.count")]
    count: Option<i64>,
    #[serde(default)]
    value: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ActionResult {
    value: Value,
}

#[derive(Debug, Serialize)]
struct BatchRequest {
    requests: Vec<BatchRequestPart>,
}

#[derive(Debug, Serialize)]
struct BatchRequestPart {
    id: String,
    method: &'static str,
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    headers: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    #[serde(default)]
    responses: Vec<BatchResponsePart>,
}

#[derive(Debug, Deserialize)]
struct BatchResponsePart {
    id: String,
    status: u16,
    #[serde(default)]
    body: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::{decode_row, encode_row, extract_error_message, properties_from_csdl};
    use masterdata_app::{EdmType, FieldValue, RowData, TableKind, default_properties};
    use serde_json::json;

    fn metadata() -> serde_json::Value {
        json!({
            "$Version": "4.0",
            "$EntityContainer": "MasterService.EntityContainer",
            "MasterService": {
                "$Kind": "Schema",
                "EntityContainer": {
                    "$Kind": "EntityContainer",
                    "Customers": { "$Collection": true, "$Type": "MasterService.Customers" }
                },
                "Customers": {
                    "$Kind": "EntityType",
                    "$Key": ["sapcustId"],
                    "sapcustId": { "$MaxLength": 20 },
                    "sfdccustomerId": { "$Type": "Edm.Int32" },
                    "name": { "$Nullable": false },
                    "opportunities": { "$Kind": "NavigationProperty", "$Collection": true }
                }
            }
        })
    }

    #[test]
    fn csdl_properties_follow_types_keys_and_nullability() {
        let properties = properties_from_csdl(&metadata(), "Customers").expect("properties");
        let names: Vec<_> = properties.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["sapcustId", "sfdccustomerId", "name"]);
        assert!(properties[0].key);
        assert_eq!(properties[0].edm_type, EdmType::String);
        assert_eq!(properties[1].edm_type, EdmType::Int32);
        assert!(properties[1].nullable);
        assert!(!properties[2].nullable);
    }

    #[test]
    fn unknown_entity_set_is_an_error() {
        let error = properties_from_csdl(&metadata(), "Projects").expect_err("missing set");
        assert!(error.to_string().contains("Projects"));
    }

    #[test]
    fn error_messages_are_found_in_common_shapes() {
        assert_eq!(
            extract_error_message(&json!({"error": {"code": "400", "message": "bad name"}})),
            Some("bad name".to_owned())
        );
        assert_eq!(
            extract_error_message(&json!({"error": {"message": {"lang": "en", "value": "locked"}}})),
            Some("locked".to_owned())
        );
        assert_eq!(
            extract_error_message(&json!({"Message": "denied"})),
            Some("denied".to_owned())
        );
        assert_eq!(extract_error_message(&json!({"error": {}})), None);
    }

    #[test]
    fn decode_uses_declared_types() {
        let properties = default_properties(TableKind::Opportunities);
        let row = decode_row(
            &json!({
                "@odata.etag": "W/\"1\"",
                "oppId": "opp-0001",
                "customerId": 10042,
                "probability": 1,
                "expectedStart": "2026-03-01",
                "expectedEnd": null
            }),
            &properties,
        )
        .expect("row");
        assert_eq!(row.get("@odata.etag"), None);
        assert_eq!(row.value("customerId"), &FieldValue::Integer(10_042));
        assert_eq!(row.value("probability"), &FieldValue::Decimal(1.0));
        assert!(matches!(row.value("expectedStart"), FieldValue::Date(_)));
        assert_eq!(row.value("expectedEnd"), &FieldValue::Null);
    }

    #[test]
    fn encode_skips_service_annotations() {
        let row = RowData::new()
            .with("name", FieldValue::text("Acme"))
            .with("$etag", FieldValue::text("x"))
            .with("verticalId", FieldValue::Integer(3));
        assert_eq!(encode_row(&row), json!({"name": "Acme", "verticalId": 3}));
    }
}
