use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, RANGE};
use reqwest::{Client, Method, StatusCode, Url};
use serde::Deserialize;
use tokio::sync::OnceCell;

use super::{
    collect, hmac_sha256, require, response_stream, send_streaming, status_error, uri_encode,
    ByteRange, ObjectBody, ObjectInfo, ObjectStore, ObjectStoreError, ObjectStream,
};
use crate::config::S3Config;
use crate::hashing::sha256_hex;

const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";
const DEFAULT_REGION: &str = "us-east-1";

/// S3-compatible object store (AWS S3, MinIO, R2, ...) using path-style
/// requests signed with Signature Version 4.
pub struct S3Store {
    config: S3Config,
    client: OnceCell<S3Client>,
}

struct S3Client {
    http: Client,
    endpoint: Url,
    bucket: String,
    region: String,
    access_key_id: String,
    secret_access_key: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListBucketResult {
    #[serde(default)]
    contents: Vec<ListedObject>,
    #[serde(default)]
    is_truncated: bool,
    #[serde(default)]
    next_continuation_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListedObject {
    key: String,
    size: u64,
}

impl S3Store {
    pub fn new(config: S3Config) -> Self {
        Self {
            config,
            client: OnceCell::new(),
        }
    }

    fn client(&self) -> Result<&S3Client, ObjectStoreError> {
        self.client.get().ok_or_else(|| {
            ObjectStoreError::Unavailable("S3 store used before initialize()".to_string())
        })
    }

    async fn connect(&self) -> Result<S3Client, ObjectStoreError> {
        let bucket = require(&self.config.bucket, "S3_BUCKET")?;
        let endpoint = require(&self.config.endpoint, "S3_ENDPOINT")?;
        let access_key_id = require(&self.config.access_key_id, "S3_ACCESS_KEY_ID")?;
        let secret_access_key = require(&self.config.secret_access_key, "S3_SECRET_ACCESS_KEY")?;

        let endpoint = Url::parse(endpoint).map_err(|e| {
            ObjectStoreError::Unavailable(format!("S3_ENDPOINT is not a valid URL: {e}"))
        })?;
        let http = Client::builder()
            .build()
            .map_err(|e| ObjectStoreError::Unavailable(format!("HTTP client: {e}")))?;

        let client = S3Client {
            http,
            endpoint,
            bucket: bucket.to_string(),
            region: self
                .config
                .region
                .clone()
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            access_key_id: access_key_id.to_string(),
            secret_access_key: secret_access_key.to_string(),
        };

        let resp = client
            .request(Method::HEAD, None, &[], &sha256_hex(b""))
            .send()
            .await
            .map_err(|e| {
                ObjectStoreError::Unavailable(format!("S3 endpoint is not reachable: {e}"))
            })?;
        if !resp.status().is_success() {
            return Err(ObjectStoreError::Unavailable(format!(
                "S3 bucket {} is not accessible ({})",
                client.bucket,
                resp.status()
            )));
        }

        tracing::info!(bucket = %client.bucket, region = %client.region, "Connected to S3");
        Ok(client)
    }
}

impl S3Client {
    /// Build a signed request for the bucket or, with `key`, one object.
    fn request(
        &self,
        method: Method,
        key: Option<&str>,
        query: &[(&str, String)],
        payload_hash: &str,
    ) -> reqwest::RequestBuilder {
        let mut path = format!(
            "{}/{}",
            self.endpoint.path().trim_end_matches('/'),
            uri_encode(&self.bucket, true)
        );
        if let Some(key) = key {
            path.push('/');
            path.push_str(&uri_encode(key, false));
        }

        let mut pairs: Vec<(String, String)> = query
            .iter()
            .map(|(k, v)| (uri_encode(k, true), uri_encode(v, true)))
            .collect();
        pairs.sort();
        let canonical_query = pairs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");

        let host = match self.endpoint.port() {
            Some(port) => format!("{}:{port}", self.endpoint.host_str().unwrap_or_default()),
            None => self.endpoint.host_str().unwrap_or_default().to_string(),
        };

        let now = Utc::now();
        let signed = sign_v4(&SigningInput {
            method: method.as_str(),
            path: &path,
            query: &canonical_query,
            host: &host,
            payload_hash,
            region: &self.region,
            access_key_id: &self.access_key_id,
            secret_access_key: &self.secret_access_key,
            now,
        });

        let mut url = format!(
            "{}://{host}{path}",
            self.endpoint.scheme()
        );
        if !canonical_query.is_empty() {
            url.push('?');
            url.push_str(&canonical_query);
        }

        self.http
            .request(method, url)
            .header("x-amz-date", signed.amz_date)
            .header("x-amz-content-sha256", payload_hash)
            .header(AUTHORIZATION, signed.authorization)
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn backend_name(&self) -> &'static str {
        "s3"
    }

    async fn initialize(&self) -> Result<(), ObjectStoreError> {
        self.client.get_or_try_init(|| self.connect()).await?;
        Ok(())
    }

    async fn put(&self, key: &str, body: ObjectBody) -> Result<u64, ObjectStoreError> {
        let client = self.client()?;
        let request = client.request(Method::PUT, Some(key), &[], UNSIGNED_PAYLOAD);

        // S3 rejects chunked uploads without a declared length.
        let (resp, written) = match body.size {
            Some(size) => {
                let request = request.header(CONTENT_LENGTH, size);
                (send_streaming(request, body.stream).await?, size)
            }
            None => {
                let data = collect(body.stream).await?;
                let size = data.len() as u64;
                (request.body(data).send().await?, size)
            }
        };

        if !resp.status().is_success() {
            return Err(status_error(resp, "S3 upload").await);
        }

        tracing::debug!(key, bytes = written, "Stored object in S3");
        Ok(written)
    }

    async fn get(
        &self,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<ObjectStream, ObjectStoreError> {
        let client = self.client()?;
        let mut request = client.request(Method::GET, Some(key), &[], &sha256_hex(b""));
        if let Some(range) = range {
            request = request.header(RANGE, range.header_value());
        }

        let resp = request.send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(ObjectStoreError::NotFound(key.to_string()));
        }
        if !resp.status().is_success() {
            return Err(status_error(resp, "S3 download").await);
        }

        let size = resp.content_length().unwrap_or_default();
        Ok(ObjectStream {
            stream: response_stream(resp),
            size,
        })
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        let client = self.client()?;
        let resp = client
            .request(Method::DELETE, Some(key), &[], &sha256_hex(b""))
            .send()
            .await?;

        // 404 is fine -- object already gone
        if !resp.status().is_success() && resp.status() != StatusCode::NOT_FOUND {
            return Err(status_error(resp, "S3 delete").await);
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ObjectInfo>, ObjectStoreError> {
        let client = self.client()?;
        let mut objects = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let mut query = vec![("list-type", "2".to_string())];
            if let Some(ref token) = token {
                query.push(("continuation-token", token.clone()));
            }

            let resp = client
                .request(Method::GET, None, &query, &sha256_hex(b""))
                .send()
                .await?;
            if !resp.status().is_success() {
                return Err(status_error(resp, "S3 list").await);
            }

            let body = resp.text().await?;
            let page: ListBucketResult = quick_xml::de::from_str(&body)
                .map_err(|e| ObjectStoreError::Transfer(format!("bad S3 list response: {e}")))?;

            objects.extend(page.contents.into_iter().map(|o| ObjectInfo {
                key: o.key,
                size: o.size,
            }));

            match page.next_continuation_token.filter(|t| !t.is_empty()) {
                Some(next) if page.is_truncated => token = Some(next),
                _ => break,
            }
        }

        Ok(objects)
    }
}

pub(crate) struct SigningInput<'a> {
    pub method: &'a str,
    /// Already URI-encoded absolute path.
    pub path: &'a str,
    /// Already canonical (sorted, encoded) query string.
    pub query: &'a str,
    pub host: &'a str,
    pub payload_hash: &'a str,
    pub region: &'a str,
    pub access_key_id: &'a str,
    pub secret_access_key: &'a str,
    pub now: DateTime<Utc>,
}

pub(crate) struct Signed {
    pub amz_date: String,
    pub authorization: String,
}

/// AWS Signature Version 4 over host, x-amz-content-sha256 and x-amz-date.
pub(crate) fn sign_v4(input: &SigningInput<'_>) -> Signed {
    let amz_date = input.now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = input.now.format("%Y%m%d").to_string();
    let signed_headers = "host;x-amz-content-sha256;x-amz-date";

    let canonical_request = format!(
        "{}\n{}\n{}\nhost:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n\n{}\n{}",
        input.method,
        input.path,
        input.query,
        input.host,
        input.payload_hash,
        amz_date,
        signed_headers,
        input.payload_hash,
    );

    let scope = format!("{date}/{}/s3/aws4_request", input.region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
        sha256_hex(canonical_request.as_bytes())
    );

    let key = signing_key(input.secret_access_key, &date, input.region, "s3");
    let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes()));

    Signed {
        authorization: format!(
            "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
            input.access_key_id
        ),
        amz_date,
    }
}

pub(crate) fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}
