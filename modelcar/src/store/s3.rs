//! S3-compatible object storage over HTTP.

use super::{normalize_path, ArtifactStore, ByteStream, PutOptions};
use crate::core::{ArtifactLocation, StorageKind};
use crate::errors::StoreError;
use crate::utils::sha256_hex;
use async_trait::async_trait;
use base64::Engine;
use futures::StreamExt;
use md5::{Digest, Md5};
use regex::Regex;
use reqwest::header::ETAG;
use reqwest::{RequestBuilder, Response, StatusCode};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Bodies larger than this are sent as a multipart upload in parts of this size.
pub const DEFAULT_PART_SIZE: usize = 8 * 1024 * 1024;

const META_PREFIX: &str = "x-amz-meta-";
const SHA256_META: &str = "x-amz-meta-sha256";

/// Path-style client for an S3-compatible endpoint.
///
/// At most one part is held in memory. A body that fits in one part goes
/// up as a single PUT; anything larger becomes a multipart upload that is
/// aborted on failure. Every request carrying data has a `Content-MD5`
/// header, so the service rejects truncated bodies and a completed object
/// is always whole. The object's SHA-256, when known, is stored as
/// `x-amz-meta-sha256` and read back by [`ArtifactStore::digest`].
#[derive(Debug, Clone)]
pub struct S3ArtifactStore {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
    part_size: usize,
}

impl S3ArtifactStore {
    /// Creates a client for `bucket` at `endpoint`.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint, bucket)
    }

    /// Creates a client using a preconfigured HTTP client.
    #[must_use]
    pub fn with_client(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            bucket: bucket.into(),
            part_size: DEFAULT_PART_SIZE,
        }
    }

    /// Sets the multipart threshold and part size.
    ///
    /// S3 requires every part except the last to be at least 5 MiB.
    #[must_use]
    pub fn with_part_size(mut self, bytes: usize) -> Self {
        self.part_size = bytes.max(1);
        self
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, key)
    }

    fn key_for(&self, location: &ArtifactLocation) -> Option<String> {
        let prefix = format!("s3://{}/", self.bucket);
        location.uri.strip_prefix(&prefix).map(str::to_string)
    }

    async fn head(&self, key: &str) -> Result<Option<Response>, StoreError> {
        let response = self
            .client
            .head(self.object_url(key))
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        match response.status() {
            s if s.is_success() => Ok(Some(response)),
            StatusCode::NOT_FOUND => Ok(None),
            s => Err(classify_status(s, &format!("HEAD {key}"))),
        }
    }

    async fn put_single(&self, key: &str, data: Vec<u8>, options: &PutOptions) -> Result<(), StoreError> {
        let sha256 = sha256_hex(&data);
        let request = self
            .client
            .put(self.object_url(key))
            .header("Content-MD5", content_md5(&data));
        let response = with_metadata(request, &options.metadata, Some(&sha256))
            .body(data)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;
        check_status(response.status(), || format!("PUT {key}"))
    }

    async fn create_multipart(&self, key: &str, options: &PutOptions) -> Result<String, StoreError> {
        let request = self.client.post(format!("{}?uploads", self.object_url(key)));
        let response = with_metadata(request, &options.metadata, options.sha256.as_deref())
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;
        check_status(response.status(), || format!("POST {key}?uploads"))?;

        let body = response.text().await.map_err(|e| classify_transport(&e))?;
        upload_id_pattern()
            .captures(&body)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| StoreError::permanent(format!("no UploadId in multipart response for {key}")))
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        number: usize,
        data: Vec<u8>,
    ) -> Result<String, StoreError> {
        let response = self
            .client
            .put(self.object_url(key))
            .query(&[("partNumber", number.to_string()), ("uploadId", upload_id.to_string())])
            .header("Content-MD5", content_md5(&data))
            .body(data)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;
        check_status(response.status(), || format!("PUT {key} part {number}"))?;

        response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| StoreError::permanent(format!("part {number} of {key} returned no ETag")))
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        first: Vec<u8>,
        mut body: ByteStream,
    ) -> Result<Vec<String>, StoreError> {
        let mut etags = Vec::new();
        let mut part = first;
        let mut exhausted = false;
        while !part.is_empty() {
            let number = etags.len() + 1;
            let etag = self
                .upload_part(key, upload_id, number, std::mem::take(&mut part))
                .await?;
            etags.push(etag);
            if exhausted {
                break;
            }
            exhausted = fill_part(&mut body, &mut part, self.part_size).await?;
        }
        Ok(etags)
    }

    async fn complete_multipart(&self, key: &str, upload_id: &str, etags: &[String]) -> Result<(), StoreError> {
        let mut body = String::from("<CompleteMultipartUpload>");
        for (i, etag) in etags.iter().enumerate() {
            let _ = write!(body, "<Part><PartNumber>{}</PartNumber><ETag>{etag}</ETag></Part>", i + 1);
        }
        body.push_str("</CompleteMultipartUpload>");

        let response = self
            .client
            .post(self.object_url(key))
            .query(&[("uploadId", upload_id)])
            .body(body)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;
        check_status(response.status(), || format!("POST {key}?uploadId"))?;

        // Completion can fail after a 200 status line.
        let text = response.text().await.map_err(|e| classify_transport(&e))?;
        if text.contains("<Error>") {
            return Err(StoreError::transient(format!("completing upload of {key} failed: {text}")));
        }
        Ok(())
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) {
        let result = self
            .client
            .delete(self.object_url(key))
            .query(&[("uploadId", upload_id)])
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {
                debug!(key = %key, upload_id = %upload_id, "Aborted multipart upload");
            }
            Ok(response) => {
                warn!(key = %key, status = %response.status(), "Failed to abort multipart upload");
            }
            Err(e) => warn!(key = %key, error = %e, "Failed to abort multipart upload"),
        }
    }
}

fn upload_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"<UploadId>([^<]+)</UploadId>").unwrap_or_else(|_| unreachable!("static pattern"))
    })
}

fn content_md5(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(Md5::digest(data))
}

fn with_metadata(
    request: RequestBuilder,
    metadata: &BTreeMap<String, String>,
    sha256: Option<&str>,
) -> RequestBuilder {
    let request = metadata.iter().fold(request, |request, (key, value)| {
        request.header(format!("{META_PREFIX}{key}"), value.as_str())
    });
    match sha256 {
        Some(digest) => request.header(SHA256_META, digest),
        None => request,
    }
}

/// Reads from `body` until `part` holds at least `limit` bytes.
///
/// Returns true once the stream is exhausted.
async fn fill_part(body: &mut ByteStream, part: &mut Vec<u8>, limit: usize) -> Result<bool, StoreError> {
    while part.len() < limit {
        match body.next().await {
            Some(chunk) => part.extend_from_slice(&chunk?),
            None => return Ok(true),
        }
    }
    Ok(false)
}

/// Classifies an HTTP status into a store error.
pub(crate) fn classify_status(status: StatusCode, context: &str) -> StoreError {
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        StoreError::transient(format!("{context}: HTTP {status}"))
    } else {
        StoreError::permanent(format!("{context}: HTTP {status}"))
    }
}

fn check_status(status: StatusCode, context: impl FnOnce() -> String) -> Result<(), StoreError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(classify_status(status, &context()))
    }
}

fn classify_transport(err: &reqwest::Error) -> StoreError {
    if err.is_builder() {
        StoreError::permanent(err.to_string())
    } else {
        StoreError::transient(err.to_string())
    }
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    fn kind(&self) -> StorageKind {
        StorageKind::S3
    }

    fn locate(&self, path: &str) -> ArtifactLocation {
        let key = normalize_path(path).unwrap_or_else(|_| path.to_string());
        ArtifactLocation::new(format!("s3://{}/{}", self.bucket, key), StorageKind::S3)
    }

    async fn put_with(
        &self,
        path: &str,
        mut body: ByteStream,
        options: &PutOptions,
    ) -> Result<ArtifactLocation, StoreError> {
        let key = normalize_path(path)?;
        let mut first = Vec::new();

        if fill_part(&mut body, &mut first, self.part_size).await? {
            self.put_single(&key, first, options).await?;
            debug!(bucket = %self.bucket, key = %key, "Uploaded object");
            return Ok(self.locate(&key));
        }

        let upload_id = self.create_multipart(&key, options).await?;
        let uploaded = async {
            let etags = self.upload_parts(&key, &upload_id, first, body).await?;
            self.complete_multipart(&key, &upload_id, &etags).await?;
            Ok::<usize, StoreError>(etags.len())
        }
        .await;

        match uploaded {
            Ok(parts) => {
                debug!(bucket = %self.bucket, key = %key, parts, "Uploaded object in parts");
                Ok(self.locate(&key))
            }
            Err(err) => {
                self.abort_multipart(&key, &upload_id).await;
                Err(err)
            }
        }
    }

    async fn exists(&self, location: &ArtifactLocation) -> Result<bool, StoreError> {
        let Some(key) = self.key_for(location) else {
            return Ok(false);
        };
        Ok(self.head(&key).await?.is_some())
    }

    async fn digest(&self, location: &ArtifactLocation) -> Result<Option<String>, StoreError> {
        let Some(key) = self.key_for(location) else {
            return Ok(None);
        };
        Ok(self.head(&key).await?.and_then(|response| {
            response
                .headers()
                .get(SHA256_META)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::bytes_stream;
    use futures::stream;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{body_string, body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const KEY: &str = "model-data/bert/1.0.0/model.safetensors";
    const OBJECT_PATH: &str = "/models/model-data/bert/1.0.0/model.safetensors";

    fn chunked(parts: &[&str]) -> ByteStream {
        stream::iter(parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect::<Vec<_>>()).boxed()
    }

    #[test]
    fn test_locate_and_url() {
        let store = S3ArtifactStore::new("http://localhost:9000/", "models");
        let location = store.locate("model-data/m/1.0.0/config.json");
        assert_eq!(location.uri, "s3://models/model-data/m/1.0.0/config.json");
        assert_eq!(
            store.object_url("model-data/m/1.0.0/config.json"),
            "http://localhost:9000/models/model-data/m/1.0.0/config.json"
        );
        assert_eq!(
            store.key_for(&location).as_deref(),
            Some("model-data/m/1.0.0/config.json")
        );
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, "PUT"),
            StoreError::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "PUT"),
            StoreError::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, "PUT"),
            StoreError::Permanent(_)
        ));
    }

    #[tokio::test]
    async fn test_small_body_is_single_put_with_checksums_and_metadata() {
        let server = MockServer::start().await;
        let data = b"{\"layers\":2}";
        Mock::given(method("PUT"))
            .and(path(OBJECT_PATH))
            .and(header("content-md5", content_md5(data).as_str()))
            .and(header("x-amz-meta-sha256", sha256_hex(data).as_str()))
            .and(header("x-amz-meta-model-name", "bert"))
            .and(body_string("{\"layers\":2}"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let store = S3ArtifactStore::new(server.uri(), "models");
        let options = PutOptions::new().with_metadata("model-name", "bert");
        let location = store
            .put_with(KEY, bytes_stream(data.to_vec()), &options)
            .await
            .unwrap();
        assert_eq!(location.uri, format!("s3://models/{KEY}"));
    }

    #[tokio::test]
    async fn test_large_body_uses_multipart_upload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(OBJECT_PATH))
            .and(query_param("uploads", ""))
            .and(header("x-amz-meta-sha256", "abc123"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<InitiateMultipartUploadResult><UploadId>up-1</UploadId></InitiateMultipartUploadResult>",
            ))
            .expect(1)
            .mount(&server)
            .await;
        for (number, part) in [(1, "abcd"), (2, "efgh"), (3, "ij")] {
            Mock::given(method("PUT"))
                .and(path(OBJECT_PATH))
                .and(query_param("uploadId", "up-1"))
                .and(query_param("partNumber", number.to_string().as_str()))
                .and(header("content-md5", content_md5(part.as_bytes()).as_str()))
                .and(body_string(part))
                .respond_with(ResponseTemplate::new(200).insert_header("ETag", format!("\"e{number}\"").as_str()))
                .expect(1)
                .mount(&server)
                .await;
        }
        Mock::given(method("POST"))
            .and(path(OBJECT_PATH))
            .and(query_param("uploadId", "up-1"))
            .and(body_string_contains("<Part><PartNumber>3</PartNumber><ETag>\"e3\"</ETag></Part>"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<CompleteMultipartUploadResult/>"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;

        let store = S3ArtifactStore::new(server.uri(), "models").with_part_size(4);
        let options = PutOptions::new().with_sha256("abc123");
        store
            .put_with(KEY, chunked(&["abcd", "efgh", "ij"]), &options)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_failed_part_aborts_upload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(OBJECT_PATH))
            .and(query_param("uploads", ""))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("<Result><UploadId>up-2</UploadId></Result>"),
            )
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(query_param("partNumber", "1"))
            .respond_with(ResponseTemplate::new(200).insert_header("ETag", "\"e1\""))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(query_param("partNumber", "2"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(query_param("uploadId", "up-2"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path(OBJECT_PATH))
            .and(query_param("uploadId", "up-2"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let store = S3ArtifactStore::new(server.uri(), "models").with_part_size(4);
        let err = store
            .put(KEY, chunked(&["abcd", "efgh"]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Transient(_)));
    }

    #[tokio::test]
    async fn test_put_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/models/busy.bin"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/models/denied.bin"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let store = S3ArtifactStore::new(server.uri(), "models");
        let busy = store.put("busy.bin", bytes_stream("x")).await.unwrap_err();
        assert!(matches!(busy, StoreError::Transient(_)));
        let denied = store.put("denied.bin", bytes_stream("x")).await.unwrap_err();
        assert!(matches!(denied, StoreError::Permanent(_)));
    }

    #[tokio::test]
    async fn test_head_reports_existence_and_digest() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/models/present.bin"))
            .respond_with(ResponseTemplate::new(200).insert_header("x-amz-meta-sha256", "feed"))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/models/unsealed.bin"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/models/missing.bin"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/models/flaky.bin"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let store = S3ArtifactStore::new(server.uri(), "models");
        let present = store.locate("present.bin");
        assert!(store.exists(&present).await.unwrap());
        assert_eq!(store.digest(&present).await.unwrap().as_deref(), Some("feed"));

        let unsealed = store.locate("unsealed.bin");
        assert!(store.exists(&unsealed).await.unwrap());
        assert_eq!(store.digest(&unsealed).await.unwrap(), None);

        let missing = store.locate("missing.bin");
        assert!(!store.exists(&missing).await.unwrap());
        assert_eq!(store.digest(&missing).await.unwrap(), None);

        let err = store.exists(&store.locate("flaky.bin")).await.unwrap_err();
        assert!(matches!(err, StoreError::Transient(_)));
    }
}
