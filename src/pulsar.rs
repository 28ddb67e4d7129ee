use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{Value, json};

use crate::error::SyncError;
use crate::models::{Payload, Record, RecordKind};

/// Record store of the Pulsar LIMS, spoken in raw JSON.
pub trait LimsClient {
    /// Every record of `kind` whose name equals `name`, ignoring case.
    fn find_by_name(&self, kind: RecordKind, name: &str) -> Result<Vec<Value>, SyncError>;
    /// Some record of `kind` whose `field` equals `value` exactly.
    fn find_by_field(
        &self,
        kind: RecordKind,
        field: &str,
        value: &str,
    ) -> Result<Option<Value>, SyncError>;
    fn get(&self, kind: RecordKind, id: i64) -> Result<Option<Value>, SyncError>;
    fn create(&self, kind: RecordKind, payload: Value) -> Result<Value, SyncError>;
    fn patch(&self, kind: RecordKind, id: i64, fields: Value) -> Result<Value, SyncError>;
}

impl<L: LimsClient + ?Sized> LimsClient for &L {
    fn find_by_name(&self, kind: RecordKind, name: &str) -> Result<Vec<Value>, SyncError> {
        (**self).find_by_name(kind, name)
    }

    fn find_by_field(
        &self,
        kind: RecordKind,
        field: &str,
        value: &str,
    ) -> Result<Option<Value>, SyncError> {
        (**self).find_by_field(kind, field, value)
    }

    fn get(&self, kind: RecordKind, id: i64) -> Result<Option<Value>, SyncError> {
        (**self).get(kind, id)
    }

    fn create(&self, kind: RecordKind, payload: Value) -> Result<Value, SyncError> {
        (**self).create(kind, payload)
    }

    fn patch(&self, kind: RecordKind, id: i64, fields: Value) -> Result<Value, SyncError> {
        (**self).patch(kind, id, fields)
    }
}

pub fn fetch<R: Record>(lims: &impl LimsClient, id: i64) -> Result<Option<R>, SyncError> {
    lims.get(R::KIND, id)?.map(decode::<R>).transpose()
}

/// Like [`fetch`], but a missing record is an error.
pub fn fetch_existing<R: Record>(lims: &impl LimsClient, id: i64) -> Result<R, SyncError> {
    fetch::<R>(lims, id)?.ok_or_else(|| SyncError::LimsStatus {
        status: StatusCode::NOT_FOUND.as_u16(),
        message: format!("{} {id} does not exist", R::KIND),
    })
}

pub fn find_by_name<R: Record>(lims: &impl LimsClient, name: &str) -> Result<Vec<R>, SyncError> {
    lims.find_by_name(R::KIND, name)?
        .into_iter()
        .map(decode::<R>)
        .collect()
}

pub fn find_by_field<R: Record>(
    lims: &impl LimsClient,
    field: &str,
    value: &str,
) -> Result<Option<R>, SyncError> {
    lims.find_by_field(R::KIND, field, value)?
        .map(decode::<R>)
        .transpose()
}

pub fn create<P: Payload>(lims: &impl LimsClient, payload: &P) -> Result<P::Output, SyncError> {
    payload.validate()?;
    let kind = <P::Output as Record>::KIND;
    let body = encode(kind, payload)?;
    decode(lims.create(kind, body)?)
}

pub fn patch<P: Payload>(
    lims: &impl LimsClient,
    id: i64,
    fields: &P,
) -> Result<P::Output, SyncError> {
    fields.validate()?;
    let kind = <P::Output as Record>::KIND;
    let body = encode(kind, fields)?;
    decode(lims.patch(kind, id, body)?)
}

fn encode<P: Payload>(kind: RecordKind, payload: &P) -> Result<Value, SyncError> {
    serde_json::to_value(payload).map_err(|err| SyncError::InvalidPayload {
        kind: kind.to_string(),
        message: err.to_string(),
    })
}

fn decode<R: Record>(value: Value) -> Result<R, SyncError> {
    serde_json::from_value(value).map_err(|err| SyncError::RecordDecode {
        kind: R::KIND.to_string(),
        message: err.to_string(),
    })
}

#[derive(Clone)]
pub struct PulsarHttpClient {
    client: Client,
    base_url: String,
}

impl PulsarHttpClient {
    pub fn new(base_url: &str, token: &str) -> Result<Self, SyncError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("seqrun-sync/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SyncError::LimsHttp(err.to_string()))?,
        );
        let mut auth = HeaderValue::from_str(&format!("Token token={}", token.trim()))
            .map_err(|err| SyncError::LimsHttp(err.to_string()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| SyncError::LimsHttp(err.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn collection_url(&self, kind: RecordKind) -> String {
        format!("{}/api/{}", self.base_url, kind.endpoint())
    }

    fn record_url(&self, kind: RecordKind, id: i64) -> String {
        format!("{}/{id}", self.collection_url(kind))
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, SyncError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "LIMS request failed".to_string());
        Err(SyncError::LimsStatus { status, message })
    }

    fn read_json(response: reqwest::blocking::Response) -> Result<Value, SyncError> {
        Self::handle_status(response)?
            .json()
            .map_err(|err| SyncError::LimsHttp(err.to_string()))
    }

    /// Sends a read-only request, retrying transient failures.
    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, SyncError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        tracing::debug!(status, attempt, "retrying LIMS request");
                        std::thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        tracing::debug!(error = %err, attempt, "retrying LIMS request");
                        std::thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(SyncError::LimsHttp(err.to_string()));
                }
            }
        }
    }

    /// Sends a write exactly once. A write the server committed before a
    /// 5xx or a timeout must not be repeated; the next import run finds it.
    fn send_once(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> Result<reqwest::blocking::Response, SyncError> {
        request
            .send()
            .map_err(|err| SyncError::LimsHttp(err.to_string()))
    }

    /// Every record of `kind`, via the index route.
    fn index(&self, kind: RecordKind) -> Result<Vec<Value>, SyncError> {
        let url = self.collection_url(kind);
        let response = self.send_with_retries(|| self.client.get(&url))?;
        match Self::read_json(response)? {
            Value::Array(records) => Ok(records),
            Value::Null => Ok(Vec::new()),
            other => Err(SyncError::RecordDecode {
                kind: kind.to_string(),
                message: format!("index returned {} instead of a list", json_type(&other)),
            }),
        }
    }
}

impl LimsClient for PulsarHttpClient {
    // The find_by route returns only the first exact match, so ambiguity and
    // case-insensitive matches are decided over the full index.
    fn find_by_name(&self, kind: RecordKind, name: &str) -> Result<Vec<Value>, SyncError> {
        let records = self.index(kind)?;
        tracing::debug!(%kind, candidates = records.len(), name, "searching records by name");
        Ok(matching_name(records, name))
    }

    fn find_by_field(
        &self,
        kind: RecordKind,
        field: &str,
        value: &str,
    ) -> Result<Option<Value>, SyncError> {
        let url = format!("{}/find_by", self.collection_url(kind));
        let body = json!({ "find_by": { field: value } });
        let response = self.send_with_retries(|| self.client.post(&url).json(&body))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        match Self::read_json(response)? {
            Value::Null => Ok(None),
            Value::Array(items) => Ok(items.into_iter().next()),
            record => Ok(Some(record)),
        }
    }

    fn get(&self, kind: RecordKind, id: i64) -> Result<Option<Value>, SyncError> {
        let url = self.record_url(kind, id);
        let response = self.send_with_retries(|| self.client.get(&url))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::read_json(response).map(Some)
    }

    fn create(&self, kind: RecordKind, payload: Value) -> Result<Value, SyncError> {
        let url = self.collection_url(kind);
        let body = wrap(kind, payload);
        let response = self.send_once(self.client.post(&url).json(&body))?;
        Self::read_json(response)
    }

    fn patch(&self, kind: RecordKind, id: i64, fields: Value) -> Result<Value, SyncError> {
        let url = self.record_url(kind, id);
        let body = wrap(kind, fields);
        let response = self.send_once(self.client.patch(&url).json(&body))?;
        Self::read_json(response)
    }
}

fn matching_name(records: Vec<Value>, name: &str) -> Vec<Value> {
    let wanted = name.trim().to_lowercase();
    records
        .into_iter()
        .filter(|record| {
            record
                .get("name")
                .and_then(Value::as_str)
                .is_some_and(|value| value.trim().to_lowercase() == wanted)
        })
        .collect()
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

fn wrap(kind: RecordKind, value: Value) -> Value {
    let mut body = serde_json::Map::new();
    body.insert(kind.param_key().to_string(), value);
    Value::Object(body)
}

pub(crate) fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

pub(crate) fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
