//! Docker Engine REST API client over TCP.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use berth_common::config::BerthConfig;
use berth_common::constants::LABEL_PROJECT;
use berth_common::error::{BerthError, Result};
use berth_common::types::ContainerId;
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Deserialize;

use super::{
    BuildOptions, ContainerEngine, ContainerInspect, ContainerSummary, CreateContainerRequest,
};

/// Error document returned by the engine on non-success responses.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateResponse {
    id: String,
}

/// [`ContainerEngine`] backed by the Docker Engine REST API.
#[derive(Debug, Clone)]
pub struct DockerHttpEngine {
    base_url: String,
    client: Client,
}

impl DockerHttpEngine {
    /// Creates a client for the engine at `base_url` (e.g. `http://localhost:2375`).
    ///
    /// # Errors
    ///
    /// Returns [`BerthError::Engine`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(None::<Duration>)
            .build()
            .map_err(|e| BerthError::engine("connect", e))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Creates a client for the engine named by `config`.
    ///
    /// # Errors
    ///
    /// Same as [`DockerHttpEngine::new`].
    pub fn from_config(config: &BerthConfig) -> Result<Self> {
        Self::new(config.engine_url.clone())
    }

    /// Returns the base URL requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn send(&self, operation: &'static str, request: RequestBuilder) -> Result<Response> {
        let response = request
            .send()
            .map_err(|e| BerthError::engine(operation, e))?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_MODIFIED {
            return Ok(response);
        }
        let text = response.text().unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.message)
            .unwrap_or(text);
        Err(BerthError::engine(operation, format!("HTTP {status}: {message}")))
    }

    fn container_action(&self, operation: &'static str, id: &ContainerId) -> Result<()> {
        tracing::debug!(id = %id, operation, "engine call");
        let url = self.url(&format!("/containers/{id}/{operation}"));
        let _ = self.send(operation, self.client.post(url))?;
        Ok(())
    }
}

impl ContainerEngine for DockerHttpEngine {
    fn image_exists(&self, image: &str) -> Result<bool> {
        tracing::debug!(image, "checking for local image");
        let response = self
            .client
            .get(self.url(&format!("/images/{image}/json")))
            .send()
            .map_err(|e| BerthError::engine("inspect image", e))?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(BerthError::engine(
                "inspect image",
                format!("HTTP {status} for image {image}"),
            )),
        }
    }

    fn pull_image(&self, image: &str) -> Result<()> {
        tracing::info!(image, "pulling image");
        let request = self
            .client
            .post(self.url("/images/create"))
            .query(&[("fromImage", image)]);
        let body = self
            .send("pull", request)?
            .text()
            .map_err(|e| BerthError::engine("pull", e))?;
        scan_progress("pull", &body)
    }

    fn build_image(&self, context: &Path, options: &BuildOptions) -> Result<String> {
        tracing::info!(context = %context.display(), tag = %options.tag, "building image");
        let archive = context_archive(context)?;

        let mut query: Vec<(&str, String)> = vec![("t", options.tag.clone())];
        if let Some(dockerfile) = &options.dockerfile {
            query.push(("dockerfile", dockerfile.clone()));
        }
        if let Some(target) = &options.target {
            query.push(("target", target.clone()));
        }
        if !options.args.is_empty() {
            query.push(("buildargs", serde_json::to_string(&options.args)?));
        }

        let request = self
            .client
            .post(self.url("/build"))
            .query(&query)
            .header(reqwest::header::CONTENT_TYPE, "application/x-tar")
            .body(archive);
        let body = self
            .send("build", request)?
            .text()
            .map_err(|e| BerthError::engine("build", e))?;
        scan_progress("build", &body)?;
        Ok(options.tag.clone())
    }

    fn create_container(&self, request: &CreateContainerRequest) -> Result<ContainerId> {
        tracing::debug!(name = %request.name, image = %request.image, "creating container");
        let http = self
            .client
            .post(self.url("/containers/create"))
            .query(&[("name", request.name.as_str())])
            .json(request);
        let created: CreateResponse = self
            .send("create", http)?
            .json()
            .map_err(|e| BerthError::engine("create", e))?;
        Ok(ContainerId::new(created.id))
    }

    fn start_container(&self, id: &ContainerId) -> Result<()> {
        self.container_action("start", id)
    }

    fn stop_container(&self, id: &ContainerId) -> Result<()> {
        self.container_action("stop", id)
    }

    fn kill_container(&self, id: &ContainerId) -> Result<()> {
        self.container_action("kill", id)
    }

    fn delete_container(&self, id: &ContainerId, force: bool) -> Result<()> {
        tracing::debug!(id = %id, force, "removing container");
        let request = self
            .client
            .delete(self.url(&format!("/containers/{id}")))
            .query(&[("force", force)]);
        let _ = self.send("delete", request)?;
        Ok(())
    }

    fn inspect_container(&self, id: &ContainerId) -> Result<ContainerInspect> {
        let request = self.client.get(self.url(&format!("/containers/{id}/json")));
        self.send("inspect", request)?
            .json()
            .map_err(|e| BerthError::engine("inspect", e))
    }

    fn list_containers(&self, project: Option<&str>) -> Result<Vec<ContainerSummary>> {
        let mut query = vec![("all", "true".to_string())];
        if let Some(project) = project {
            query.push(("filters", project_filter(project)?));
        }
        let request = self.client.get(self.url("/containers/json")).query(&query);
        self.send("list", request)?
            .json()
            .map_err(|e| BerthError::engine("list", e))
    }
}

/// Encodes a list filter selecting containers of `project`.
fn project_filter(project: &str) -> Result<String> {
    let filter = BTreeMap::from([("label", vec![format!("{LABEL_PROJECT}={project}")])]);
    Ok(serde_json::to_string(&filter)?)
}

/// Packs a build context directory into a gzip-compressed tarball.
pub(crate) fn context_archive(context: &Path) -> Result<Vec<u8>> {
    let io_err = |e| BerthError::Io {
        path: context.to_path_buf(),
        source: e,
    };
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.append_dir_all(".", context).map_err(io_err)?;
    let encoder = builder.into_inner().map_err(io_err)?;
    encoder.finish().map_err(io_err)
}

/// Fails on the first `error` record of a streamed progress body.
fn scan_progress(operation: &'static str, body: &str) -> Result<()> {
    for line in body.lines().filter(|l| !l.trim().is_empty()) {
        let Ok(record) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        if let Some(error) = record.get("error") {
            let message = error
                .as_str()
                .map_or_else(|| error.to_string(), str::to_string);
            return Err(BerthError::engine(operation, message));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    #[test]
    fn base_url_loses_trailing_slash() {
        let engine = DockerHttpEngine::new("http://localhost:2375/").expect("client");
        assert_eq!(engine.base_url(), "http://localhost:2375");
        assert_eq!(
            engine.url("/containers/json"),
            "http://localhost:2375/containers/json"
        );
    }

    #[test]
    fn engine_from_config_uses_engine_url() {
        let config = BerthConfig::from_vars(|name| {
            (name == "DOCKER_HOST").then(|| "tcp://10.0.0.2:2375".to_string())
        });
        let engine = DockerHttpEngine::from_config(&config).expect("client");
        assert_eq!(engine.base_url(), "http://10.0.0.2:2375");
    }

    #[test]
    fn progress_without_errors_passes() {
        let body = "{\"status\":\"Pulling from library/nginx\"}\n{\"status\":\"Done\"}\n";
        assert!(scan_progress("pull", body).is_ok());
    }

    #[test]
    fn progress_error_record_fails() {
        let body = "{\"stream\":\"Step 1/2\"}\n{\"errorDetail\":{\"message\":\"boom\"},\"error\":\"boom\"}\n";
        let err = scan_progress("build", body).unwrap_err();
        assert!(matches!(err, BerthError::Engine { operation: "build", ref message } if message == "boom"));
    }

    #[test]
    fn project_filter_is_label_json() {
        let filter = project_filter("shop").expect("filter");
        assert_eq!(filter, r#"{"label":["com.docker.compose.project=shop"]}"#);
    }

    #[test]
    fn build_context_is_gzipped_tarball() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("Dockerfile"), "FROM scratch\n").expect("write");

        let archive = context_archive(dir.path()).expect("archive");
        let mut tar = tar::Archive::new(flate2::read::GzDecoder::new(archive.as_slice()));
        let mut found = false;
        for entry in tar.entries().expect("entries") {
            let mut entry = entry.expect("entry");
            let path = entry.path().expect("path").to_path_buf();
            if path.ends_with("Dockerfile") {
                let mut content = String::new();
                let _ = entry.read_to_string(&mut content).expect("read");
                assert_eq!(content, "FROM scratch\n");
                found = true;
            }
        }
        assert!(found, "Dockerfile missing from context archive");
    }

    #[test]
    fn missing_context_is_io_error() {
        let err = context_archive(Path::new("/nonexistent/berth/context")).unwrap_err();
        assert!(matches!(err, BerthError::Io { .. }));
    }
}
