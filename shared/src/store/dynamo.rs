use async_trait::async_trait;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::operation::update_item::UpdateItemError;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoClient;
use serde_json::Value;
use std::collections::HashMap;

use super::{DocumentStore, Fields, Filter, FilterOp, WriteMode};
use crate::error::StoreError;

/// Attributes owned by the table layout, never exposed as document fields.
const META_KEYS: [&str; 4] = ["PK", "SK", "entity_type", "doc_id"];

type Item = HashMap<String, AttributeValue>;

/// Single-table layout: `PK = SK = <collection>#<id>`, with `entity_type`
/// holding the collection and `doc_id` the bare id.
pub struct DynamoStore {
    client: DynamoClient,
    table_name: String,
}

impl DynamoStore {
    pub fn new(client: DynamoClient, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }
}

pub fn item_key(collection: &str, id: &str) -> String {
    format!("{}#{}", collection, id)
}

fn is_meta(name: &str) -> bool {
    META_KEYS.contains(&name)
}

pub fn to_attr(value: &Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Number(n) => AttributeValue::N(n.to_string()),
        Value::String(s) => AttributeValue::S(s.clone()),
        Value::Array(items) => AttributeValue::L(items.iter().map(to_attr).collect()),
        Value::Object(map) => AttributeValue::M(
            map.iter()
                .map(|(k, v)| (k.clone(), to_attr(v)))
                .collect(),
        ),
    }
}

fn number(n: &str) -> Value {
    n.parse::<serde_json::Number>()
        .map(Value::Number)
        .unwrap_or_else(|_| Value::String(n.to_string()))
}

pub fn from_attr(attr: &AttributeValue) -> Value {
    match attr {
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::N(n) => number(n),
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::L(items) => Value::Array(items.iter().map(from_attr).collect()),
        AttributeValue::M(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), from_attr(v)))
                .collect(),
        ),
        AttributeValue::Ss(items) => Value::Array(items.iter().cloned().map(Value::String).collect()),
        AttributeValue::Ns(items) => Value::Array(items.iter().map(|n| number(n)).collect()),
        _ => Value::Null,
    }
}

pub fn from_item(item: &Item) -> Fields {
    item.iter()
        .filter(|(name, _)| !is_meta(name))
        .map(|(name, attr)| (name.clone(), from_attr(attr)))
        .collect()
}

fn op_symbol(op: FilterOp) -> &'static str {
    match op {
        FilterOp::Eq => "=",
        FilterOp::Ne => "<>",
        FilterOp::Lt => "<",
        FilterOp::Lte => "<=",
        FilterOp::Gt => ">",
        FilterOp::Gte => ">=",
    }
}

/// Scan filter for one collection plus the caller's predicates.
pub(crate) fn filter_expression(
    collection: &str,
    filters: &[Filter],
) -> (String, HashMap<String, String>, Item) {
    let mut clauses = vec!["entity_type = :entity_type".to_string()];
    let mut names = HashMap::new();
    let mut values = HashMap::new();
    values.insert(
        ":entity_type".to_string(),
        AttributeValue::S(collection.to_string()),
    );

    for (i, filter) in filters.iter().enumerate() {
        clauses.push(format!("#q{i} {} :q{i}", op_symbol(filter.op)));
        names.insert(format!("#q{i}"), filter.field.clone());
        values.insert(format!(":q{i}"), to_attr(&filter.value));
    }

    (clauses.join(" AND "), names, values)
}

#[async_trait]
impl DocumentStore for DynamoStore {
    async fn write(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
        mode: WriteMode,
    ) -> Result<(), StoreError> {
        let pk = item_key(collection, id);

        if mode == WriteMode::Overwrite {
            let mut item: Item = fields
                .iter()
                .filter(|(name, _)| !is_meta(name))
                .map(|(name, value)| (name.clone(), to_attr(value)))
                .collect();
            item.insert("PK".to_string(), AttributeValue::S(pk.clone()));
            item.insert("SK".to_string(), AttributeValue::S(pk));
            item.insert("entity_type".to_string(), AttributeValue::S(collection.to_string()));
            item.insert("doc_id".to_string(), AttributeValue::S(id.to_string()));

            self.client
                .put_item()
                .table_name(&self.table_name)
                .set_item(Some(item))
                .send()
                .await
                .map_err(|e| StoreError::write(collection, DisplayErrorContext(e)))?;
            return Ok(());
        }

        // Merge and update share one SET expression; the layout attributes are
        // always rewritten so the expression is never empty.
        let mut sets = vec![
            "entity_type = :entity_type".to_string(),
            "doc_id = :doc_id".to_string(),
        ];
        let mut builder = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .key("PK", AttributeValue::S(pk.clone()))
            .key("SK", AttributeValue::S(pk))
            .expression_attribute_values(":entity_type", AttributeValue::S(collection.to_string()))
            .expression_attribute_values(":doc_id", AttributeValue::S(id.to_string()));

        for (i, (name, value)) in fields.iter().filter(|(name, _)| !is_meta(name)).enumerate() {
            sets.push(format!("#f{i} = :f{i}"));
            builder = builder
                .expression_attribute_names(format!("#f{i}"), name)
                .expression_attribute_values(format!(":f{i}"), to_attr(value));
        }
        builder = builder.update_expression(format!("SET {}", sets.join(", ")));

        if mode == WriteMode::Update {
            builder = builder.condition_expression("attribute_exists(PK)");
        }

        match builder.send().await {
            Ok(_) => Ok(()),
            Err(e) => {
                if matches!(
                    e.as_service_error(),
                    Some(UpdateItemError::ConditionalCheckFailedException(_))
                ) {
                    Err(StoreError::MissingDocument {
                        collection: collection.to_string(),
                        id: id.to_string(),
                    })
                } else {
                    Err(StoreError::write(collection, DisplayErrorContext(e)))
                }
            }
        }
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Fields>, StoreError> {
        let pk = item_key(collection, id);

        let result = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("PK", AttributeValue::S(pk.clone()))
            .key("SK", AttributeValue::S(pk))
            .send()
            .await
            .map_err(|e| StoreError::read(collection, DisplayErrorContext(e)))?;

        Ok(result.item().map(from_item))
    }

    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
    ) -> Result<Vec<(String, Fields)>, StoreError> {
        let (expression, names, values) = filter_expression(collection, filters);
        let names = if names.is_empty() { None } else { Some(names) };

        let mut records = Vec::new();
        let mut start_key: Option<Item> = None;
        loop {
            let resp = self
                .client
                .scan()
                .table_name(&self.table_name)
                .filter_expression(&expression)
                .set_expression_attribute_names(names.clone())
                .set_expression_attribute_values(Some(values.clone()))
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(|e| StoreError::read(collection, DisplayErrorContext(e)))?;

            for item in resp.items() {
                if let Some(id) = item.get("doc_id").and_then(|v| v.as_s().ok()) {
                    records.push((id.clone(), from_item(item)));
                }
            }

            match resp.last_evaluated_key() {
                Some(key) if !key.is_empty() => start_key = Some(key.clone()),
                _ => break,
            }
        }

        records.sort_by(|a, b| a.0.cmp(&b.0));
        tracing::debug!(collection, count = records.len(), "scan complete");
        Ok(records)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let pk = item_key(collection, id);

        self.client
            .delete_item()
            .table_name(&self.table_name)
            .key("PK", AttributeValue::S(pk.clone()))
            .key("SK", AttributeValue::S(pk))
            .send()
            .await
            .map_err(|e| StoreError::write(collection, DisplayErrorContext(e)))?;
        Ok(())
    }
}
