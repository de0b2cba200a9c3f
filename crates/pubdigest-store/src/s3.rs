//! Amazon S3 store.
//!
//! Talks to the S3 REST API directly (ListObjectsV2, GetObject, PutObject)
//! with SigV4 signing. A custom `endpoint_url` switches to path-style
//! addressing for S3-compatible services (MinIO, LocalStack).
//!
//! Credentials come from `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and
//! optionally `AWS_SESSION_TOKEN`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use secrecy::SecretString;
use tracing::{debug, instrument};

use crate::error::{StoreError, StoreResult};
use crate::sigv4::{self, SigningInput};
use crate::store::{ListFilter, ObjectMeta, ObjectStore};

pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: SecretString,
    pub session_token: Option<SecretString>,
}

impl S3Credentials {
    pub fn from_env() -> StoreResult<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .map_err(|_| StoreError::Backend("AWS_ACCESS_KEY_ID environment variable not set".into()))?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .map_err(|_| StoreError::Backend("AWS_SECRET_ACCESS_KEY environment variable not set".into()))?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok().map(SecretString::from);

        Ok(Self {
            access_key_id,
            secret_access_key: SecretString::from(secret_access_key),
            session_token,
        })
    }
}

pub struct S3ObjectStore {
    bucket: String,
    region: String,
    endpoint_url: Option<String>,
    creds: S3Credentials,
    client: reqwest::Client,
    label: String,
}

/// Where one request goes.
struct Target {
    url: String,
    host: String,
    canonical_uri: String,
}

impl S3ObjectStore {
    pub fn new(bucket: impl Into<String>, region: impl Into<String>, creds: S3Credentials) -> Self {
        let bucket = bucket.into();
        Self {
            label: format!("s3://{bucket}"),
            bucket,
            region: region.into(),
            endpoint_url: None,
            creds,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint_url: Option<String>) -> Self {
        self.endpoint_url = endpoint_url.filter(|e| !e.trim().is_empty());
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Virtual-hosted style on AWS, path style on custom endpoints.
    /// `encoded_key` is empty for bucket-level requests.
    fn target(&self, encoded_key: &str) -> Target {
        match &self.endpoint_url {
            Some(endpoint) => {
                let scheme = if endpoint.starts_with("http://") { "http" } else { "https" };
                let host = endpoint
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_end_matches('/')
                    .to_string();
                let canonical_uri = format!("/{}/{encoded_key}", self.bucket);
                Target { url: format!("{scheme}://{host}{canonical_uri}"), host, canonical_uri }
            }
            None => {
                let host = format!("{}.s3.{}.amazonaws.com", self.bucket, self.region);
                let canonical_uri = format!("/{encoded_key}");
                Target { url: format!("https://{host}{canonical_uri}"), host, canonical_uri }
            }
        }
    }

    fn signed(
        &self,
        builder: reqwest::RequestBuilder,
        method: &str,
        target: &Target,
        canonical_query: &str,
        payload_hash: &str,
    ) -> reqwest::RequestBuilder {
        let headers = sigv4::sign(
            &self.creds,
            &SigningInput {
                method,
                host: &target.host,
                canonical_uri: &target.canonical_uri,
                canonical_query,
                payload_hash,
                region: &self.region,
                at: Utc::now(),
            },
        );
        headers.into_iter().fold(builder, |b, (k, v)| b.header(k, v))
    }

    async fn fail(&self, op: &str, key: &str, resp: reqwest::Response) -> StoreError {
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return StoreError::NotFound(format!("{}/{key}", self.label));
        }
        let body = resp.text().await.unwrap_or_default();
        StoreError::Backend(format!(
            "S3 {op} failed (HTTP {status}) for '{key}': {}",
            body.chars().take(500).collect::<String>()
        ))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, body), fields(bucket = %self.bucket, bytes = body.len()))]
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> StoreResult<()> {
        let target = self.target(&sigv4::encode_key(key));
        let payload_hash = sigv4::hex_sha256(&body);
        let req = self
            .client
            .put(&target.url)
            .header("content-type", content_type)
            .body(body);
        let resp = self
            .signed(req, "PUT", &target, "", &payload_hash)
            .send()
            .await
            .map_err(|e| StoreError::Backend(format!("failed to put {}/{key}: {e}", self.label)))?;
        if !resp.status().is_success() {
            return Err(self.fail("PutObject", key, resp).await);
        }
        debug!(key, "Uploaded object");
        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn get(&self, key: &str) -> StoreResult<Vec<u8>> {
        let target = self.target(&sigv4::encode_key(key));
        let payload_hash = sigv4::hex_sha256(b"");
        let req = self.client.get(&target.url);
        let resp = self
            .signed(req, "GET", &target, "", &payload_hash)
            .send()
            .await
            .map_err(|e| StoreError::Backend(format!("failed to get {}/{key}: {e}", self.label)))?;
        if !resp.status().is_success() {
            return Err(self.fail("GetObject", key, resp).await);
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| StoreError::Backend(format!("failed to read {}/{key}: {e}", self.label)))?;
        Ok(bytes.to_vec())
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn list(&self, filter: &ListFilter) -> StoreResult<Vec<ObjectMeta>> {
        let target = self.target("");
        let payload_hash = sigv4::hex_sha256(b"");
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("list-type".to_string(), "2".to_string()),
                ("max-keys".to_string(), "1000".to_string()),
            ];
            if let Some(prefix) = filter.prefix.as_ref().filter(|p| !p.is_empty()) {
                params.push(("prefix".to_string(), prefix.clone()));
            }
            if let Some(token) = &continuation_token {
                params.push(("continuation-token".to_string(), token.clone()));
            }
            let query = sigv4::canonical_query(&params);

            let req = self.client.get(format!("{}?{query}", target.url));
            let resp = self
                .signed(req, "GET", &target, &query, &payload_hash)
                .send()
                .await
                .map_err(|e| StoreError::Backend(format!("failed to list {}: {e}", self.label)))?;
            if !resp.status().is_success() {
                return Err(self.fail("ListObjectsV2", "", resp).await);
            }
            let xml = resp
                .text()
                .await
                .map_err(|e| StoreError::Backend(format!("failed to read listing: {e}")))?;

            let page = parse_list_objects(&xml)?;
            objects.extend(page.objects.into_iter().filter(|m| filter.matches(m)));

            match page.next_token {
                Some(token) if page.is_truncated => continuation_token = Some(token),
                _ => break,
            }
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        debug!(count = objects.len(), "Listed objects");
        Ok(objects)
    }

    fn name(&self) -> &str {
        &self.label
    }
}

#[derive(Debug, Default)]
struct ListPage {
    objects: Vec<ObjectMeta>,
    is_truncated: bool,
    next_token: Option<String>,
}

/// Parse a `ListBucketResult` body. Folder placeholders (`.../`) are skipped.
fn parse_list_objects(xml: &str) -> StoreResult<ListPage> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut page = ListPage::default();
    let mut path: Vec<String> = Vec::new();
    let (mut key, mut modified, mut size) = (String::new(), String::new(), String::new());

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if name == "Contents" {
                    key.clear();
                    modified.clear();
                    size.clear();
                }
                path.push(name);
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| StoreError::Backend(format!("invalid listing XML: {e}")))?;
                let parent = path.len().checked_sub(2).and_then(|i| path.get(i)).map(String::as_str);
                match (parent, path.last().map(String::as_str)) {
                    (Some("Contents"), Some("Key")) => key.push_str(&text),
                    (Some("Contents"), Some("LastModified")) => modified.push_str(&text),
                    (Some("Contents"), Some("Size")) => size.push_str(&text),
                    (Some("ListBucketResult"), Some("IsTruncated")) => page.is_truncated = text.trim() == "true",
                    (Some("ListBucketResult"), Some("NextContinuationToken")) => {
                        page.next_token = Some(text.into_owned())
                    }
                    _ => {}
                }
            }
            Ok(Event::End(_)) => {
                if path.pop().as_deref() == Some("Contents") && !key.is_empty() && !key.ends_with('/') {
                    let last_modified = DateTime::parse_from_rfc3339(modified.trim())
                        .map(|dt| dt.with_timezone(&Utc))
                        .map_err(|e| StoreError::Backend(format!("bad LastModified for {key}: {e}")))?;
                    page.objects.push(ObjectMeta {
                        key: key.clone(),
                        last_modified,
                        size: size.trim().parse().unwrap_or(0),
                    });
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(StoreError::Backend(format!("invalid listing XML: {e}"))),
            _ => {}
        }
    }
    Ok(page)
}
