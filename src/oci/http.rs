//! Registry client over the distribution HTTP API
//!
//! Requests are blocking (ureq) and run on the blocking pool. Only
//! anonymous and basic authentication are supported.
// TODO: support bearer token challenges for registries that require them

use crate::error::{PorchletError, PorchletResult};
use crate::oci::client::{ImageConfig, RegistryClient, RootFs};
use crate::oci::layers::flatten_layers;
use crate::oci::{split_image, ImageDigestName, ImageTagName};
use async_trait::async_trait;
use base64::{prelude::BASE64_STANDARD, Engine};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::debug;
use ureq::http::Response;
use ureq::{Agent, Body, RequestBuilder};

const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.manifest.v1+json, \
                               application/vnd.docker.distribution.manifest.v2+json";
const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
const OCI_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
const OCI_LAYER_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const MAX_MANIFEST_SIZE: u64 = 4 * 1024 * 1024;
const MAX_BLOB_SIZE: u64 = 512 * 1024 * 1024;
const CATALOG_PAGE_SIZE: u32 = 10_000;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    media_type: Option<String>,
    config: Descriptor,
    layers: Vec<Descriptor>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Descriptor {
    media_type: String,
    digest: String,
    size: u64,
}

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct Catalog {
    #[serde(default)]
    repositories: Vec<String>,
}

/// Distribution API client
#[derive(Clone)]
pub struct HttpRegistryClient {
    agent: Agent,
    scheme: &'static str,
    authorization: Option<String>,
}

impl HttpRegistryClient {
    /// Create a client; `insecure` talks plain http
    pub fn new(insecure: bool) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(REQUEST_TIMEOUT))
            .http_status_as_error(false)
            .build()
            .into();
        Self {
            agent,
            scheme: if insecure { "http" } else { "https" },
            authorization: None,
        }
    }

    /// Authenticate every request with basic credentials
    pub fn with_basic_auth(mut self, username: &str, password: &str) -> Self {
        let token = BASE64_STANDARD.encode(format!("{}:{}", username, password));
        self.authorization = Some(format!("Basic {}", token));
        self
    }

    fn url(&self, host: &str, path: &str) -> String {
        format!("{}://{}/v2/{}", self.scheme, host, path)
    }

    fn authorize<B>(&self, req: RequestBuilder<B>) -> RequestBuilder<B> {
        match &self.authorization {
            Some(value) => req.header("Authorization", value.as_str()),
            None => req,
        }
    }

    async fn blocking<T, F>(&self, f: F) -> PorchletResult<T>
    where
        F: FnOnce(Self) -> PorchletResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let this = self.clone();
        tokio::task::spawn_blocking(move || f(this))
            .await
            .map_err(|e| PorchletError::Internal(format!("registry request task failed: {}", e)))?
    }

    fn resolve_tag_blocking(&self, tag: &ImageTagName) -> PorchletResult<ImageDigestName> {
        let (host, path) = split_image(&tag.image)?;
        let url = self.url(host, &format!("{}/manifests/{}", path, tag.tag));

        let mut resp = self
            .authorize(self.agent.head(&url))
            .header("Accept", MANIFEST_ACCEPT)
            .call()
            .map_err(|e| transport_err(tag, e))?;
        if resp.status().as_u16() == 404 {
            return Err(PorchletError::registry(tag, "tag not found"));
        }
        check_status(tag, "resolving tag", &mut resp)?;

        if let Some(digest) = header(&resp, "Docker-Content-Digest") {
            return Ok(ImageDigestName::new(&tag.image, digest));
        }

        // Some registries omit the digest header on HEAD
        let mut resp = self
            .authorize(self.agent.get(&url))
            .header("Accept", MANIFEST_ACCEPT)
            .call()
            .map_err(|e| transport_err(tag, e))?;
        check_status(tag, "fetching manifest", &mut resp)?;
        let body = read_limited(tag, &mut resp, MAX_MANIFEST_SIZE)?;
        Ok(ImageDigestName::new(&tag.image, sha256_digest(&body)))
    }

    fn fetch_manifest(&self, image: &ImageDigestName) -> PorchletResult<Manifest> {
        let (host, path) = split_image(&image.image)?;
        let url = self.url(host, &format!("{}/manifests/{}", path, image.digest));

        let mut resp = self
            .authorize(self.agent.get(&url))
            .header("Accept", MANIFEST_ACCEPT)
            .call()
            .map_err(|e| transport_err(image, e))?;
        check_status(image, "fetching manifest", &mut resp)?;
        let body = read_limited(image, &mut resp, MAX_MANIFEST_SIZE)?;

        serde_json::from_slice(&body)
            .map_err(|e| PorchletError::registry(image, format!("invalid manifest: {}", e)))
    }

    fn fetch_blob(&self, image: &ImageDigestName, digest: &str) -> PorchletResult<Vec<u8>> {
        let (host, path) = split_image(&image.image)?;
        let url = self.url(host, &format!("{}/blobs/{}", path, digest));

        let mut resp = self
            .authorize(self.agent.get(&url))
            .call()
            .map_err(|e| transport_err(image, e))?;
        check_status(image, "fetching blob", &mut resp)?;
        let body = read_limited(image, &mut resp, MAX_BLOB_SIZE)?;

        let actual = sha256_digest(&body);
        if actual != digest {
            return Err(PorchletError::registry(
                image,
                format!("blob digest mismatch: expected {}, got {}", digest, actual),
            ));
        }
        Ok(body)
    }

    fn upload_blob(&self, tag: &ImageTagName, digest: &str, bytes: &[u8]) -> PorchletResult<()> {
        let (host, path) = split_image(&tag.image)?;

        let exists_url = self.url(host, &format!("{}/blobs/{}", path, digest));
        if let Ok(resp) = self.authorize(self.agent.head(&exists_url)).call() {
            if resp.status().is_success() {
                debug!("Blob {} already present in {}", digest, tag.image);
                return Ok(());
            }
        }

        let start_url = self.url(host, &format!("{}/blobs/uploads/", path));
        let mut resp = self
            .authorize(self.agent.post(&start_url))
            .send_empty()
            .map_err(|e| transport_err(tag, e))?;
        check_status(tag, "starting blob upload", &mut resp)?;

        let location = header(&resp, "Location")
            .ok_or_else(|| PorchletError::registry(tag, "blob upload returned no location"))?;
        let location = if location.starts_with("http://") || location.starts_with("https://") {
            location
        } else {
            format!("{}://{}{}", self.scheme, host, location)
        };
        let separator = if location.contains('?') { '&' } else { '?' };
        let put_url = format!("{}{}digest={}", location, separator, digest);

        let mut resp = self
            .authorize(self.agent.put(&put_url))
            .header("Content-Type", "application/octet-stream")
            .send(bytes)
            .map_err(|e| transport_err(tag, e))?;
        check_status(tag, "uploading blob", &mut resp)
    }

    fn push_image_blocking(
        &self,
        tag: &ImageTagName,
        layer: Vec<u8>,
        mut config: ImageConfig,
    ) -> PorchletResult<ImageDigestName> {
        let (host, path) = split_image(&tag.image)?;

        let diff_id = sha256_digest(&layer);
        let compressed = gzip(&layer)
            .map_err(|e| PorchletError::registry(tag, format!("compressing layer: {}", e)))?;
        let layer_digest = sha256_digest(&compressed);

        config.rootfs = RootFs {
            diff_ids: vec![diff_id],
            ..RootFs::default()
        };
        let config_bytes = serde_json::to_vec(&config)?;
        let config_digest = sha256_digest(&config_bytes);

        self.upload_blob(tag, &layer_digest, &compressed)?;
        self.upload_blob(tag, &config_digest, &config_bytes)?;

        let manifest = Manifest {
            schema_version: 2,
            media_type: Some(OCI_MANIFEST.to_string()),
            config: Descriptor {
                media_type: OCI_CONFIG.to_string(),
                digest: config_digest,
                size: config_bytes.len() as u64,
            },
            layers: vec![Descriptor {
                media_type: OCI_LAYER_GZIP.to_string(),
                digest: layer_digest,
                size: compressed.len() as u64,
            }],
        };
        let manifest_bytes = serde_json::to_vec(&manifest)?;

        let url = self.url(host, &format!("{}/manifests/{}", path, tag.tag));
        let mut resp = self
            .authorize(self.agent.put(&url))
            .header("Content-Type", OCI_MANIFEST)
            .send(&manifest_bytes[..])
            .map_err(|e| transport_err(tag, e))?;
        check_status(tag, "pushing manifest", &mut resp)?;

        let digest = sha256_digest(&manifest_bytes);
        debug!("Pushed {} as {}", tag, digest);
        Ok(ImageDigestName::new(&tag.image, digest))
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn list_images(&self, prefix: &str) -> PorchletResult<Vec<String>> {
        let prefix = prefix.trim_end_matches('/').to_string();
        self.blocking(move |this| {
            let (host, path) = split_image(&prefix)?;
            let url = format!(
                "{}://{}/v2/_catalog?n={}",
                this.scheme, host, CATALOG_PAGE_SIZE
            );
            let mut resp = this
                .authorize(this.agent.get(&url))
                .call()
                .map_err(|e| transport_err(&prefix, e))?;
            check_status(&prefix, "listing catalog", &mut resp)?;
            let body = read_limited(&prefix, &mut resp, MAX_MANIFEST_SIZE)?;
            let catalog: Catalog = serde_json::from_slice(&body)?;

            let under = format!("{}/", path);
            Ok(catalog
                .repositories
                .into_iter()
                .filter(|r| r.starts_with(&under))
                .map(|r| format!("{}/{}", host, r))
                .collect())
        })
        .await
    }

    async fn list_tags(&self, image: &str) -> PorchletResult<Vec<String>> {
        let image = image.to_string();
        self.blocking(move |this| {
            let (host, path) = split_image(&image)?;
            let url = this.url(host, &format!("{}/tags/list", path));
            let mut resp = this
                .authorize(this.agent.get(&url))
                .call()
                .map_err(|e| transport_err(&image, e))?;
            if resp.status().as_u16() == 404 {
                return Ok(vec![]);
            }
            check_status(&image, "listing tags", &mut resp)?;
            let body = read_limited(&image, &mut resp, MAX_MANIFEST_SIZE)?;
            let list: TagList = serde_json::from_slice(&body)?;
            Ok(list.tags.unwrap_or_default())
        })
        .await
    }

    async fn resolve_tag(&self, tag: &ImageTagName) -> PorchletResult<ImageDigestName> {
        let tag = tag.clone();
        self.blocking(move |this| this.resolve_tag_blocking(&tag))
            .await
    }

    async fn fetch_config(&self, image: &ImageDigestName) -> PorchletResult<Vec<u8>> {
        let image = image.clone();
        self.blocking(move |this| {
            let manifest = this.fetch_manifest(&image)?;
            this.fetch_blob(&image, &manifest.config.digest)
        })
        .await
    }

    async fn fetch_layers(&self, image: &ImageDigestName) -> PorchletResult<Vec<u8>> {
        let image = image.clone();
        self.blocking(move |this| {
            let manifest = this.fetch_manifest(&image)?;
            let mut layers = Vec::with_capacity(manifest.layers.len());
            for descriptor in &manifest.layers {
                let blob = this.fetch_blob(&image, &descriptor.digest)?;
                let tar = gunzip_if_compressed(blob).map_err(|e| {
                    PorchletError::registry(
                        &image,
                        format!("decompressing layer {}: {}", descriptor.digest, e),
                    )
                })?;
                layers.push(tar);
            }
            flatten_layers(&layers)
        })
        .await
    }

    async fn push_image(
        &self,
        tag: &ImageTagName,
        layer: Vec<u8>,
        config: ImageConfig,
    ) -> PorchletResult<ImageDigestName> {
        let tag = tag.clone();
        self.blocking(move |this| this.push_image_blocking(&tag, layer, config))
            .await
    }

    async fn delete_image(&self, image: &ImageDigestName) -> PorchletResult<()> {
        let image = image.clone();
        self.blocking(move |this| {
            let (host, path) = split_image(&image.image)?;
            let url = this.url(host, &format!("{}/manifests/{}", path, image.digest));
            let mut resp = this
                .authorize(this.agent.delete(&url))
                .call()
                .map_err(|e| transport_err(&image, e))?;
            if resp.status().as_u16() == 404 {
                debug!("Manifest {} already deleted", image);
                return Ok(());
            }
            check_status(&image, "deleting manifest", &mut resp)
        })
        .await
    }
}

fn header(resp: &Response<Body>, name: &str) -> Option<String> {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn check_status(
    image: impl std::fmt::Display,
    action: &str,
    resp: &mut Response<Body>,
) -> PorchletResult<()> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let body = resp.body_mut().read_to_string().unwrap_or_default();
    Err(PorchletError::registry(
        image,
        format!("{} returned {}: {}", action, status, body.trim()),
    ))
}

fn read_limited(
    image: impl std::fmt::Display,
    resp: &mut Response<Body>,
    limit: u64,
) -> PorchletResult<Vec<u8>> {
    resp.body_mut()
        .with_config()
        .limit(limit)
        .read_to_vec()
        .map_err(|e| PorchletError::registry(image, format!("reading response: {}", e)))
}

fn transport_err(image: impl std::fmt::Display, e: ureq::Error) -> PorchletError {
    PorchletError::registry(image, e.to_string())
}

fn sha256_digest(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

fn gzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

fn gunzip_if_compressed(blob: Vec<u8>) -> std::io::Result<Vec<u8>> {
    if !blob.starts_with(&[0x1f, 0x8b]) {
        return Ok(blob);
    }
    let mut tar = Vec::new();
    GzDecoder::new(&blob[..]).read_to_end(&mut tar)?;
    Ok(tar)
}
