use std::collections::HashMap;
use std::fmt;

use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::types::AttributeValue as DynamoValue;
use kvbench_types::{AttributeValue, BenchmarkItem, ID_ATTRIBUTE};

use crate::common::{Store, StoreError, StoreOp, StoreResult};

/// A [`Store`] backed by Amazon DynamoDB.
///
/// Credentials and region are resolved from the environment through the default AWS provider
/// chain. The underlying client is cheap to share and safe to use from many tasks at once.
pub struct DynamoDbStore {
    client: Client,
    endpoint: Option<String>,
}

impl DynamoDbStore {
    /// Creates a store from the ambient AWS configuration.
    ///
    /// When an `endpoint` is given, all requests go there instead of the regional endpoint, for
    /// example to target DynamoDB Local.
    pub async fn from_env(endpoint: Option<&str>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(endpoint) = endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let config = loader.load().await;

        Self {
            client: Client::new(&config),
            endpoint: endpoint.map(str::to_owned),
        }
    }

    /// Creates a store from an existing DynamoDB client.
    pub fn new(client: Client) -> Self {
        Self {
            client,
            endpoint: None,
        }
    }
}

impl fmt::Debug for DynamoDbStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamoDbStore")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

fn request_error<E>(op: StoreOp, table: &str, cause: E) -> StoreError
where
    E: std::error::Error + Send + Sync + 'static,
{
    StoreError::Request {
        op,
        table: table.to_owned(),
        cause: Box::new(cause),
    }
}

fn to_dynamo(item: &BenchmarkItem) -> HashMap<String, DynamoValue> {
    item.iter()
        .map(|(name, value)| {
            let value = match value {
                AttributeValue::S(s) => DynamoValue::S(s.clone()),
                AttributeValue::N(n) => DynamoValue::N(n.clone()),
            };
            (name.clone(), value)
        })
        .collect()
}

fn from_dynamo(attributes: HashMap<String, DynamoValue>) -> BenchmarkItem {
    attributes
        .into_iter()
        .filter_map(|(name, value)| match value {
            DynamoValue::S(s) => Some((name, AttributeValue::S(s))),
            DynamoValue::N(n) => Some((name, AttributeValue::N(n))),
            other => {
                tracing::trace!(%name, ?other, "skipping unsupported attribute type");
                None
            }
        })
        .collect()
}

#[async_trait::async_trait]
impl Store for DynamoDbStore {
    fn name(&self) -> &'static str {
        "dynamodb"
    }

    #[tracing::instrument(level = "trace", skip(self, projection))]
    async fn scan(
        &self,
        table: &str,
        projection: &[&str],
        limit: usize,
    ) -> StoreResult<Vec<BenchmarkItem>> {
        let mut request = self
            .client
            .scan()
            .table_name(table)
            .limit(i32::try_from(limit).unwrap_or(i32::MAX));
        if !projection.is_empty() {
            request = request.projection_expression(projection.join(", "));
        }

        let output = request
            .send()
            .await
            .map_err(|err| request_error(StoreOp::Scan, table, err))?;

        Ok(output
            .items
            .unwrap_or_default()
            .into_iter()
            .map(from_dynamo)
            .collect())
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn get(&self, table: &str, id: &str) -> StoreResult<Option<BenchmarkItem>> {
        let output = self
            .client
            .get_item()
            .table_name(table)
            .key(ID_ATTRIBUTE, DynamoValue::S(id.to_owned()))
            .send()
            .await
            .map_err(|err| request_error(StoreOp::Get, table, err))?;

        Ok(output.item.map(from_dynamo))
    }

    #[tracing::instrument(level = "trace", skip(self, item), fields(id = item.id()))]
    async fn put(&self, table: &str, item: &BenchmarkItem) -> StoreResult<()> {
        self.client
            .put_item()
            .table_name(table)
            .set_item(Some(to_dynamo(item)))
            .send()
            .await
            .map_err(|err| request_error(StoreOp::Put, table, err))?;

        Ok(())
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn delete(&self, table: &str, id: &str) -> StoreResult<()> {
        self.client
            .delete_item()
            .table_name(table)
            .key(ID_ATTRIBUTE, DynamoValue::S(id.to_owned()))
            .send()
            .await
            .map_err(|err| request_error(StoreOp::Delete, table, err))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_supported_attributes() {
        let mut item = BenchmarkItem::with_id("abc");
        item.insert("0", AttributeValue::S("lorem".into()));
        item.insert("1", AttributeValue::N("4.20".into()));

        let mut raw = to_dynamo(&item);
        assert_eq!(raw.get("1"), Some(&DynamoValue::N("4.20".into())));

        raw.insert("flag".into(), DynamoValue::Bool(true));
        assert_eq!(from_dynamo(raw), item);
    }
}
