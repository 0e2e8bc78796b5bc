use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use tokio::sync::OnceCell;

use super::{
    collect, hmac_sha256, require, response_stream, send_streaming, status_error, uri_encode,
    ByteRange, ObjectBody, ObjectInfo, ObjectStore, ObjectStoreError, ObjectStream,
};
use crate::config::AzureConfig;

const API_VERSION: &str = "2021-08-06";

/// Azure Blob Storage container authenticated with a shared account key.
pub struct AzureBlobStore {
    config: AzureConfig,
    client: OnceCell<AzureClient>,
}

struct AzureClient {
    http: Client,
    endpoint: String,
    account: String,
    container: String,
    key: Vec<u8>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EnumerationResults {
    #[serde(default)]
    blobs: BlobList,
    #[serde(default)]
    next_marker: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
struct BlobList {
    #[serde(default)]
    blob: Vec<ListedBlob>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListedBlob {
    name: String,
    properties: BlobProperties,
}

#[derive(Deserialize)]
struct BlobProperties {
    #[serde(rename = "Content-Length")]
    content_length: u64,
}

impl AzureBlobStore {
    pub fn new(config: AzureConfig) -> Self {
        Self {
            config,
            client: OnceCell::new(),
        }
    }

    fn client(&self) -> Result<&AzureClient, ObjectStoreError> {
        self.client.get().ok_or_else(|| {
            ObjectStoreError::Unavailable("Azure store used before initialize()".to_string())
        })
    }

    async fn connect(&self) -> Result<AzureClient, ObjectStoreError> {
        let account = require(&self.config.account, "AZURE_STORAGE_ACCOUNT")?;
        let access_key = require(&self.config.access_key, "AZURE_STORAGE_ACCESS_KEY")?;
        let container = require(&self.config.container, "AZURE_STORAGE_CONTAINER")?;

        let key = STANDARD.decode(access_key).map_err(|_| {
            ObjectStoreError::Unavailable("AZURE_STORAGE_ACCESS_KEY is not valid base64".to_string())
        })?;
        let endpoint = self
            .config
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://{account}.blob.core.windows.net"))
            .trim_end_matches('/')
            .to_string();
        let http = Client::builder()
            .build()
            .map_err(|e| ObjectStoreError::Unavailable(format!("HTTP client: {e}")))?;

        let client = AzureClient {
            http,
            endpoint,
            account: account.to_string(),
            container: container.to_string(),
            key,
        };

        let resp = client
            .request(Method::GET, None, &[("restype", "container".to_string())], 0)
            .send()
            .await
            .map_err(|e| {
                ObjectStoreError::Unavailable(format!("Azure endpoint is not reachable: {e}"))
            })?;
        if !resp.status().is_success() {
            return Err(ObjectStoreError::Unavailable(format!(
                "Azure container {} is not accessible ({})",
                client.container,
                resp.status()
            )));
        }

        tracing::info!(account = %client.account, container = %client.container, "Connected to Azure Blob Storage");
        Ok(client)
    }
}

impl AzureClient {
    fn request(
        &self,
        method: Method,
        blob: Option<&str>,
        query: &[(&str, String)],
        content_length: u64,
    ) -> reqwest::RequestBuilder {
        self.request_with(method, blob, query, content_length, &[])
    }

    /// Build a SharedKey-signed request. `extra` holds additional `x-ms-*` headers.
    fn request_with(
        &self,
        method: Method,
        blob: Option<&str>,
        query: &[(&str, String)],
        content_length: u64,
        extra: &[(&str, String)],
    ) -> reqwest::RequestBuilder {
        let mut path = format!("/{}", uri_encode(&self.container, true));
        if let Some(blob) = blob {
            path.push('/');
            path.push_str(&uri_encode(blob, false));
        }

        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let mut ms_headers: Vec<(String, String)> = vec![
            ("x-ms-date".to_string(), date),
            ("x-ms-version".to_string(), API_VERSION.to_string()),
        ];
        ms_headers.extend(extra.iter().map(|(k, v)| (k.to_lowercase(), v.clone())));

        let authorization = shared_key_authorization(
            &self.account,
            &self.key,
            &StringToSign {
                method: method.as_str(),
                content_length,
                ms_headers: &ms_headers,
                path: &path,
                query,
            },
        );

        let mut url = format!("{}{path}", self.endpoint);
        if !query.is_empty() {
            let encoded = query
                .iter()
                .map(|(k, v)| format!("{}={}", uri_encode(k, true), uri_encode(v, true)))
                .collect::<Vec<_>>()
                .join("&");
            url.push('?');
            url.push_str(&encoded);
        }

        let mut request = self
            .http
            .request(method, url)
            .header(AUTHORIZATION, authorization);
        for (name, value) in ms_headers {
            request = request.header(name, value);
        }
        request
    }
}

#[async_trait]
impl ObjectStore for AzureBlobStore {
    fn backend_name(&self) -> &'static str {
        "azure"
    }

    async fn initialize(&self) -> Result<(), ObjectStoreError> {
        self.client.get_or_try_init(|| self.connect()).await?;
        Ok(())
    }

    async fn put(&self, key: &str, body: ObjectBody) -> Result<u64, ObjectStoreError> {
        let client = self.client()?;
        let blob_type = [("x-ms-blob-type", "BlockBlob".to_string())];

        // Put Blob needs Content-Length up front, and it is part of the signature.
        let (resp, written) = match body.size {
            Some(size) => {
                let request = client
                    .request_with(Method::PUT, Some(key), &[], size, &blob_type)
                    .header(CONTENT_LENGTH, size);
                (send_streaming(request, body.stream).await?, size)
            }
            None => {
                let data = collect(body.stream).await?;
                let size = data.len() as u64;
                let request = client
                    .request_with(Method::PUT, Some(key), &[], size, &blob_type)
                    .body(data);
                (request.send().await?, size)
            }
        };

        if !resp.status().is_success() {
            return Err(status_error(resp, "Azure upload").await);
        }

        tracing::debug!(key, bytes = written, "Stored blob in Azure");
        Ok(written)
    }

    async fn get(
        &self,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<ObjectStream, ObjectStoreError> {
        let client = self.client()?;
        let extra: Vec<(&str, String)> = range
            .map(|r| vec![("x-ms-range", r.header_value())])
            .unwrap_or_default();

        let resp = client
            .request_with(Method::GET, Some(key), &[], 0, &extra)
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(ObjectStoreError::NotFound(key.to_string()));
        }
        if !resp.status().is_success() {
            return Err(status_error(resp, "Azure download").await);
        }

        let size = resp.content_length().unwrap_or_default();
        Ok(ObjectStream {
            stream: response_stream(resp),
            size,
        })
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        let client = self.client()?;
        let resp = client.request(Method::DELETE, Some(key), &[], 0).send().await?;

        if !resp.status().is_success() && resp.status() != StatusCode::NOT_FOUND {
            return Err(status_error(resp, "Azure delete").await);
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ObjectInfo>, ObjectStoreError> {
        let client = self.client()?;
        let mut objects = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut query = vec![
                ("comp", "list".to_string()),
                ("restype", "container".to_string()),
            ];
            if let Some(ref marker) = marker {
                query.push(("marker", marker.clone()));
            }

            let resp = client.request(Method::GET, None, &query, 0).send().await?;
            if !resp.status().is_success() {
                return Err(status_error(resp, "Azure list").await);
            }

            let body = resp.text().await?;
            let page: EnumerationResults = quick_xml::de::from_str(&body).map_err(|e| {
                ObjectStoreError::Transfer(format!("bad Azure list response: {e}"))
            })?;

            objects.extend(page.blobs.blob.into_iter().map(|b| ObjectInfo {
                key: b.name,
                size: b.properties.content_length,
            }));

            match page.next_marker.filter(|m| !m.is_empty()) {
                Some(next) => marker = Some(next),
                None => break,
            }
        }

        Ok(objects)
    }
}

pub(crate) struct StringToSign<'a> {
    pub method: &'a str,
    pub content_length: u64,
    /// Lowercase `x-ms-*` headers sent with the request.
    pub ms_headers: &'a [(String, String)],
    /// Encoded `/{container}[/{blob}]`.
    pub path: &'a str,
    pub query: &'a [(&'a str, String)],
}

impl StringToSign<'_> {
    fn render(&self, account: &str) -> String {
        // Zero is signed as an empty Content-Length.
        let content_length = if self.content_length == 0 {
            String::new()
        } else {
            self.content_length.to_string()
        };

        // VERB, Content-Encoding, Content-Language, Content-Length, Content-MD5,
        // Content-Type, Date, If-Modified-Since, If-Match, If-None-Match,
        // If-Unmodified-Since, Range
        let mut out = format!(
            "{}\n\n\n{content_length}\n\n\n\n\n\n\n\n\n",
            self.method
        );

        let mut headers: Vec<&(String, String)> = self.ms_headers.iter().collect();
        headers.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, value) in headers {
            out.push_str(&format!("{name}:{}\n", value.trim()));
        }

        out.push_str(&format!("/{account}{}", self.path));

        let mut params: Vec<(String, &str)> = self
            .query
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.as_str()))
            .collect();
        params.sort();
        for (name, value) in params {
            out.push_str(&format!("\n{name}:{value}"));
        }
        out
    }
}

pub(crate) fn shared_key_authorization(
    account: &str,
    key: &[u8],
    input: &StringToSign<'_>,
) -> String {
    let signature = STANDARD.encode(hmac_sha256(key, input.render(account).as_bytes()));
    format!("SharedKey {account}:{signature}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers() -> Vec<(String, String)> {
        vec![
            ("x-ms-version".to_string(), API_VERSION.to_string()),
            (
                "x-ms-date".to_string(),
                "Wed, 01 May 2024 12:00:00 GMT".to_string(),
            ),
        ]
    }

    #[test]
    fn test_string_to_sign_layout() {
        let headers = headers();
        let query = [
            ("restype", "container".to_string()),
            ("comp", "list".to_string()),
        ];
        let rendered = StringToSign {
            method: "GET",
            content_length: 0,
            ms_headers: &headers,
            path: "/files",
            query: &query,
        }
        .render("acct");

        assert_eq!(
            rendered,
            "GET\n\n\n\n\n\n\n\n\n\n\n\n\
             x-ms-date:Wed, 01 May 2024 12:00:00 GMT\n\
             x-ms-version:2021-08-06\n\
             /acct/files\ncomp:list\nrestype:container"
        );
    }

    #[test]
    fn test_content_length_is_signed_when_nonzero() {
        let headers = headers();
        let rendered = StringToSign {
            method: "PUT",
            content_length: 42,
            ms_headers: &headers,
            path: "/files/blob",
            query: &[],
        }
        .render("acct");

        assert!(rendered.starts_with("PUT\n\n\n42\n"));
        assert!(rendered.ends_with("/acct/files/blob"));
    }

    #[test]
    fn test_authorization_header_shape() {
        let headers = headers();
        let key = STANDARD.decode("c2VjcmV0LWtleQ==").unwrap();
        let auth = shared_key_authorization(
            "acct",
            &key,
            &StringToSign {
                method: "DELETE",
                content_length: 0,
                ms_headers: &headers,
                path: "/files/blob",
                query: &[],
            },
        );

        let signature = auth.strip_prefix("SharedKey acct:").unwrap();
        assert_eq!(STANDARD.decode(signature).unwrap().len(), 32);
    }

    #[test]
    fn test_list_response_parsing() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<EnumerationResults ServiceEndpoint="https://acct.blob.core.windows.net/" ContainerName="files">
  <Blobs>
    <Blob>
      <Name>one</Name>
      <Properties><Content-Length>7</Content-Length><BlobType>BlockBlob</BlobType></Properties>
    </Blob>
    <Blob>
      <Name>two</Name>
      <Properties><Content-Length>9</Content-Length></Properties>
    </Blob>
  </Blobs>
  <NextMarker />
</EnumerationResults>"#;
        let page: EnumerationResults = quick_xml::de::from_str(xml).unwrap();
        assert_eq!(page.blobs.blob.len(), 2);
        assert_eq!(page.blobs.blob[0].name, "one");
        assert_eq!(page.blobs.blob[1].properties.content_length, 9);
        assert!(page.next_marker.filter(|m| !m.is_empty()).is_none());
    }
}
