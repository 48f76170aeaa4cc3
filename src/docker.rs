use crate::config::Config;
use crate::image_reference::ImageReference;
use crate::transfer::{ImageTransfer, TransferError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE};
use futures::StreamExt;
use reqwest::{Certificate, Client, Response};
use serde::{Deserialize, Serialize};
use std::fs;
use tracing::{debug, info, warn};

const REGISTRY_AUTH_HEADER: &str = "X-Registry-Auth";

/// Docker Engine API client used to copy images into the mirror registry.
///
/// Pull and push stream newline-delimited JSON progress messages; an error
/// message anywhere in the stream fails the operation.
pub struct DockerClient {
    http: Client,
    base_url: String,
    registry_auth: String,
}

#[derive(Serialize)]
struct AuthConfig<'a> {
    username: &'a str,
    password: &'a str,
    serveraddress: &'a str,
}

#[derive(Deserialize)]
struct DaemonError {
    message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProgressMessage {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_detail: Option<ErrorDetail>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
}

pub fn create_client(config: &Config) -> Result<DockerClient> {
    info!("Initializing Docker Engine API client");
    // System certificates are loaded automatically with rustls-tls-native-roots
    let mut client_builder = Client::builder();

    for file_path in &config.docker.ca_certificate_paths {
        let file_content = fs::read(file_path)
            .with_context(|| format!("Failed to read file {}", file_path.display()))?;
        let cert = Certificate::from_pem(&file_content).context("Failed to parse certificate")?;
        client_builder = client_builder.add_root_certificate(cert);
    }

    let http = client_builder
        .build()
        .context("Failed to build HTTP client")?;

    if config.credentials.password.is_empty() {
        warn!("No registry password configured, pushes to the mirror are unauthenticated");
    }
    let registry_auth = encode_registry_auth(
        &config.credentials.username,
        config.credentials.password.expose_secret(),
        config.mirror.registry.as_deref().unwrap_or_default(),
    )?;

    let base_url = config.docker_host();
    info!("Using Docker Engine API at {}", base_url);

    Ok(DockerClient::from_parts(http, base_url, registry_auth))
}

fn encode_registry_auth(username: &str, password: &str, server: &str) -> Result<String> {
    let auth = AuthConfig {
        username,
        password,
        serveraddress: server,
    };
    let json = serde_json::to_vec(&auth).context("Failed to encode registry credentials")?;
    Ok(URL_SAFE.encode(json))
}

impl DockerClient {
    pub fn from_parts(http: Client, base_url: String, registry_auth: String) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            registry_auth,
        }
    }

    async fn post(
        &self,
        path: &str,
        query: &[(&str, &str)],
        with_auth: bool,
    ) -> Result<Response, TransferError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {} {:?}", url, query);

        let mut request = self.http.post(&url).query(query);
        if with_auth {
            request = request.header(REGISTRY_AUTH_HEADER, &self.registry_auth);
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<DaemonError>(&body)
                .map(|e| e.message)
                .unwrap_or(body);
            return Err(TransferError::Status { status, message });
        }
        Ok(response)
    }

    async fn watch(response: Response) -> Result<(), TransferError> {
        let mut watcher = ProgressWatcher::default();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            watcher.feed(&chunk?)?;
        }
        watcher.finish()
    }
}

fn parse(image: &str) -> Result<ImageReference, TransferError> {
    ImageReference::parse(image).map_err(|source| TransferError::InvalidImage {
        image: image.to_string(),
        source,
    })
}

#[async_trait]
impl ImageTransfer for DockerClient {
    async fn pull(&self, image: &str) -> Result<(), TransferError> {
        let reference = parse(image)?;
        let response = self
            .post(
                "/images/create",
                &[
                    ("fromImage", reference.repository.as_str()),
                    ("tag", reference.tag_or_digest()),
                ],
                false,
            )
            .await?;
        Self::watch(response).await
    }

    async fn tag(&self, source: &str, target: &str) -> Result<(), TransferError> {
        parse(source)?;
        let target_reference = parse(target)?;
        self.post(
            &format!("/images/{}/tag", source),
            &[
                ("repo", target_reference.repository.as_str()),
                ("tag", target_reference.tag_or_digest()),
            ],
            false,
        )
        .await?;

        info!("'{}' successfully tagged as '{}'", source, target);
        Ok(())
    }

    async fn push(&self, image: &str) -> Result<(), TransferError> {
        let reference = parse(image)?;
        let response = self
            .post(
                &format!("/images/{}/push", reference.repository),
                &[("tag", reference.tag_or_digest())],
                true,
            )
            .await?;
        Self::watch(response).await
    }
}

/// Splits a progress stream into JSON lines and surfaces the first error message.
#[derive(Default)]
struct ProgressWatcher {
    buffer: Vec<u8>,
    last_status: String,
}

impl ProgressWatcher {
    fn feed(&mut self, chunk: &[u8]) -> Result<(), TransferError> {
        self.buffer.extend_from_slice(chunk);
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.handle_line(&line)?;
        }
        Ok(())
    }

    fn finish(mut self) -> Result<(), TransferError> {
        let rest = std::mem::take(&mut self.buffer);
        self.handle_line(&rest)
    }

    fn handle_line(&mut self, line: &[u8]) -> Result<(), TransferError> {
        let line = line.trim_ascii();
        if line.is_empty() {
            return Ok(());
        }

        let message: ProgressMessage = serde_json::from_slice(line)?;
        if let Some(detail) = message.error_detail.filter(|d| !d.message.is_empty()) {
            return Err(TransferError::Stream(detail.message));
        }
        if let Some(error) = message.error.filter(|e| !e.is_empty()) {
            return Err(TransferError::Stream(error));
        }

        if let Some(status) = message.status.filter(|s| !s.is_empty()) {
            if !status.eq_ignore_ascii_case(&self.last_status) {
                debug!("{}", status);
                self.last_status = status;
            }
        }
        Ok(())
    }
}
