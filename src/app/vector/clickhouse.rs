use super::{base_url, parse_settings, read_empty, read_json};
use crate::core::model::{
    connection::ConnectorType, parse_metadata, Hit, Namespace, RawPage, VectorEntry, VectorRecord,
};
use crate::core::vector::{augment_metadata, ScoreKind, VectorDb};
use crate::{err, error::HubError, map_err};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::OnceCell;
use tracing::{debug, info};
use validify::{schema_err, schema_validation, ValidationErrors, Validify};

pub const CLICKHOUSE_DEFAULT_DATABASE: &str = "default";

#[derive(Debug, Clone, Serialize, Deserialize, Validify)]
#[serde(rename_all = "camelCase")]
#[validate(Self::validate_schema)]
pub struct ClickHouseSettings {
    /// URL of the HTTP interface, e.g. `http://localhost:8123`.
    #[validate(length(min = 1))]
    #[modify(trim)]
    pub host: String,

    pub username: Option<String>,

    pub password: Option<String>,

    /// Defaults to [CLICKHOUSE_DEFAULT_DATABASE].
    pub database: Option<String>,
}

impl ClickHouseSettings {
    #[schema_validation]
    fn validate_schema(&self) -> Result<(), ValidationErrors> {
        if self.password.is_some() && self.username.is_none() {
            schema_err!("password", "a password requires a username");
        }
        if let Some(ref database) = self.database {
            if !is_identifier(database) {
                schema_err!("database", "invalid database name");
            }
        }
    }

    fn database(&self) -> &str {
        self.database
            .as_deref()
            .unwrap_or(CLICKHOUSE_DEFAULT_DATABASE)
    }
}

/// ClickHouse over its HTTP interface. Every table in the database is a namespace;
/// tables created here hold `(id, embedding, text, metadata)` rows.
///
/// Similarity search is a full scan ordered by `cosineDistance`.
pub struct ClickHouseDb {
    settings: ClickHouseSettings,
    client: OnceCell<reqwest::Client>,
}

#[derive(Debug, Deserialize)]
struct JsonResult<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    name: String,
    total_rows: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct VectorRow {
    id: String,
    #[serde(default)]
    embedding: Vec<f32>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    metadata: String,
    #[serde(default)]
    distance: Option<f32>,
}

#[derive(Debug, Serialize)]
struct InsertRow<'a> {
    id: &'a str,
    embedding: &'a [f32],
    text: &'a str,
    metadata: String,
}

impl ClickHouseDb {
    pub fn new(settings: ClickHouseSettings) -> Self {
        Self {
            settings,
            client: OnceCell::new(),
        }
    }

    pub fn from_settings(settings: &Value) -> Result<Self, HubError> {
        Ok(Self::new(parse_settings(settings)?))
    }

    async fn client(&self) -> Result<&reqwest::Client, HubError> {
        self.client
            .get_or_try_init(|| async {
                info!("Connecting to clickhouse at {}", self.settings.host);

                let mut headers = HeaderMap::new();

                if let Some(ref user) = self.settings.username {
                    let user = match HeaderValue::from_str(user) {
                        Ok(user) => user,
                        Err(e) => return err!(InvalidArgument, "clickhouse username: {e}"),
                    };
                    headers.insert("X-ClickHouse-User", user);
                }

                if let Some(ref password) = self.settings.password {
                    let key = match HeaderValue::from_str(password) {
                        Ok(key) => key,
                        Err(e) => return err!(InvalidArgument, "clickhouse password: {e}"),
                    };
                    headers.insert("X-ClickHouse-Key", key);
                }

                Ok(map_err!(reqwest::Client::builder()
                    .default_headers(headers)
                    .build()))
            })
            .await
    }

    /// Send a statement with an optional body of data.
    async fn execute(
        &self,
        query: &str,
        data: Option<String>,
    ) -> Result<reqwest::Response, HubError> {
        let client = self.client().await?;
        let url = format!("{}/", base_url(&self.settings.host));

        debug!("clickhouse | {}", truncate(query));

        let request = client.post(url).query(&[
            ("database", self.settings.database()),
            ("query", query),
            ("output_format_json_quote_64bit_integers", "0"),
        ]);

        let request = match data {
            Some(data) => request.body(data),
            None => request,
        };

        Ok(map_err!(request.send().await))
    }

    async fn select<T>(&self, query: &str) -> Result<Vec<T>, HubError>
    where
        T: DeserializeOwned,
    {
        let response = self.execute(&format!("{query} FORMAT JSON"), None).await?;
        let result: JsonResult<T> = read_json(response).await?;
        Ok(result.data)
    }

    async fn tables(&self, name: Option<&str>) -> Result<Vec<TableRow>, HubError> {
        let mut query = String::from(
            "SELECT name, total_rows FROM system.tables \
             WHERE database = currentDatabase() AND NOT is_temporary AND engine NOT LIKE '%View'",
        );
        if let Some(name) = name {
            query.push_str(&format!(" AND name = {}", quote(name)));
        }
        self.select(&query).await
    }
}

#[async_trait::async_trait]
impl VectorDb for ClickHouseDb {
    fn id(&self) -> ConnectorType {
        ConnectorType::ClickHouse
    }

    fn score_kind(&self) -> ScoreKind {
        ScoreKind::CosineDistance
    }

    async fn heartbeat(&self) -> Result<(), HubError> {
        let client = self.client().await?;
        let url = format!("{}/ping", base_url(&self.settings.host));
        let response = map_err!(client.get(url).send().await);

        let status = response.status();
        let body = map_err!(response.text().await);

        if !status.is_success() || body.trim() != "Ok." {
            return err!(Unhealthy, "clickhouse ping answered {status}: {}", body.trim());
        }

        Ok(())
    }

    async fn total_vectors(&self) -> Result<usize, HubError> {
        Ok(self
            .tables(None)
            .await?
            .iter()
            .map(|t| t.total_rows.unwrap_or_default() as usize)
            .sum())
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>, HubError> {
        Ok(self
            .tables(None)
            .await?
            .into_iter()
            .map(|t| Namespace::new(t.name, t.total_rows.unwrap_or_default() as usize))
            .collect())
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, HubError> {
        Ok(self
            .tables(Some(name))
            .await?
            .into_iter()
            .next()
            .map(|t| Namespace::new(t.name, t.total_rows.unwrap_or_default() as usize)))
    }

    async fn ensure_namespace(&self, name: &str, _dimension: usize) -> Result<(), HubError> {
        let table = identifier(name)?;
        let query = format!(
            "CREATE TABLE IF NOT EXISTS {table} \
             (id String, embedding Array(Float32), text String, metadata String) \
             ENGINE = MergeTree ORDER BY id"
        );
        let response = self.execute(&query, None).await?;
        read_empty(response).await
    }

    async fn raw_get(
        &self,
        name: &str,
        limit: usize,
        offset: usize,
    ) -> Result<RawPage, HubError> {
        let table = identifier(name)?;
        let rows: Vec<VectorRow> = self
            .select(&format!(
                "SELECT id, embedding, metadata FROM {table} ORDER BY id LIMIT {limit} OFFSET {offset}"
            ))
            .await?;

        let entries = rows
            .into_iter()
            .map(|row| VectorEntry {
                vector_id: row.id,
                values: row.embedding,
                metadata: parse_metadata(&row.metadata),
            })
            .collect();

        Ok(RawPage::new(entries))
    }

    async fn insert_records(
        &self,
        namespace: &str,
        records: &[VectorRecord],
    ) -> Result<(), HubError> {
        let table = identifier(namespace)?;

        let mut data = String::new();
        for record in records {
            let row = InsertRow {
                id: &record.id,
                embedding: &record.embedding,
                text: &record.text,
                metadata: map_err!(serde_json::to_string(&record.metadata)),
            };
            data.push_str(&map_err!(serde_json::to_string(&row)));
            data.push('\n');
        }

        let response = self
            .execute(&format!("INSERT INTO {table} FORMAT JSONEachRow"), Some(data))
            .await?;

        read_empty(response).await
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<Hit>, HubError> {
        let table = identifier(namespace)?;
        let vector = float_array(vector)?;

        let rows: Vec<VectorRow> = self
            .select(&format!(
                "SELECT id, text, metadata, cosineDistance(embedding, {vector}) AS distance \
                 FROM {table} ORDER BY distance ASC LIMIT {top_k}"
            ))
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| Hit {
                id: row.id,
                raw_score: row.distance.unwrap_or(f32::NAN),
                text: row.text,
                metadata: parse_metadata(&row.metadata),
            })
            .collect())
    }

    async fn get_metadata(
        &self,
        namespace: &str,
        ids: &[String],
    ) -> Result<Vec<Map<String, Value>>, HubError> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        let table = identifier(namespace)?;
        let rows: Vec<VectorRow> = self
            .select(&format!(
                "SELECT id, text, metadata FROM {table} WHERE id IN ({})",
                quote_list(ids)
            ))
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| augment_metadata(parse_metadata(&row.metadata), &row.id, row.text))
            .collect())
    }

    async fn delete_vectors(&self, namespace: &str, ids: &[String]) -> Result<(), HubError> {
        let table = identifier(namespace)?;
        let query = format!(
            "ALTER TABLE {table} DELETE WHERE id IN ({})",
            quote_list(ids)
        );
        let response = self.execute(&query, None).await?;
        read_empty(response).await
    }
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Validate a table name and quote it as an identifier.
fn identifier(name: &str) -> Result<String, HubError> {
    if !is_identifier(name) {
        return err!(InvalidArgument, "invalid clickhouse table name '{name}'");
    }
    Ok(format!("`{name}`"))
}

/// Quote a string literal.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn quote_list(values: &[String]) -> String {
    values
        .iter()
        .map(|v| quote(v))
        .collect::<Vec<_>>()
        .join(", ")
}

fn float_array(vector: &[f32]) -> Result<String, HubError> {
    if vector.iter().any(|v| !v.is_finite()) {
        return err!(InvalidArgument, "query vector contains non finite values");
    }
    Ok(map_err!(serde_json::to_string(vector)))
}

fn truncate(query: &str) -> &str {
    match query.char_indices().nth(200) {
        Some((i, _)) => &query[..i],
        None => query,
    }
}
