// HTTP client for the cluster custom-resource API

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use stencil_core::manifest::API_VERSION;
use stencil_core::LabelSelector;
use tracing::{debug, instrument};

use super::{ClusterError, ClusterObject, ClusterStore};

const RESOURCE: &str = "workflowtemplates";

#[derive(Debug, Clone)]
pub struct HttpClusterStoreConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout: Duration,
}

#[derive(Deserialize)]
struct ObjectList {
    #[serde(default)]
    items: Vec<ClusterObject>,
}

pub struct HttpClusterStore {
    base_url: Url,
    token: Option<String>,
    http: reqwest::Client,
}

impl HttpClusterStore {
    pub fn new(config: HttpClusterStoreConfig) -> Result<Self, ClusterError> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            ClusterError::Transport(format!("invalid cluster API URL {}: {}", config.base_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ClusterError::Transport(format!(
                "cluster API URL {} cannot carry a path",
                config.base_url
            )));
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            base_url,
            token: config.token,
            http,
        })
    }

    /// `{base}/apis/{group}/{version}/namespaces/{ns}/workflowtemplates[/{name}]`,
    /// with namespace and name percent-encoded as single segments.
    fn url(&self, namespace: &str, name: Option<&str>) -> Result<Url, ClusterError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                ClusterError::Transport(format!(
                    "cluster API URL {} cannot carry a path",
                    self.base_url
                ))
            })?;
            segments.pop_if_empty().push("apis");
            segments.extend(API_VERSION.split('/'));
            segments.push("namespaces").push(namespace).push(RESOURCE);
            if let Some(name) = name {
                segments.push(name);
            }
        }
        Ok(url)
    }

    fn collection_url(&self, namespace: &str) -> Result<Url, ClusterError> {
        self.url(namespace, None)
    }

    fn object_url(&self, namespace: &str, name: &str) -> Result<Url, ClusterError> {
        self.url(namespace, Some(name))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn error_for(response: reqwest::Response, name: &str) -> ClusterError {
        let status = response.status();
        let message = response.text().await.unwrap_or_default();
        match status {
            StatusCode::NOT_FOUND => ClusterError::NotFound(name.to_string()),
            StatusCode::CONFLICT => ClusterError::Conflict(message),
            _ => ClusterError::Api {
                status: status.as_u16(),
                message,
            },
        }
    }

    async fn handle_object(
        response: reqwest::Response,
        name: &str,
    ) -> Result<ClusterObject, ClusterError> {
        if !response.status().is_success() {
            return Err(Self::error_for(response, name).await);
        }
        let object = response.json().await?;
        Ok(object)
    }
}

#[async_trait]
impl ClusterStore for HttpClusterStore {
    #[instrument(skip(self, object), fields(name = %object.metadata.name))]
    async fn create(
        &self,
        namespace: &str,
        object: ClusterObject,
    ) -> Result<ClusterObject, ClusterError> {
        let request = self.http.post(self.collection_url(namespace)?).json(&object);
        let response = self.authorize(request).send().await?;
        Self::handle_object(response, &object.metadata.name).await
    }

    #[instrument(skip(self, object), fields(name = %object.metadata.name))]
    async fn update(
        &self,
        namespace: &str,
        object: ClusterObject,
    ) -> Result<ClusterObject, ClusterError> {
        let url = self.object_url(namespace, &object.metadata.name)?;
        let request = self.http.put(url).json(&object);
        let response = self.authorize(request).send().await?;
        Self::handle_object(response, &object.metadata.name).await
    }

    #[instrument(skip(self))]
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let request = self.http.delete(self.object_url(namespace, name)?);
        let response = self.authorize(request).send().await?;

        if response.status().is_success() {
            debug!(name, "deleted cluster object");
            return Ok(());
        }
        Err(Self::error_for(response, name).await)
    }

    #[instrument(skip(self))]
    async fn get(&self, namespace: &str, name: &str) -> Result<ClusterObject, ClusterError> {
        let request = self.http.get(self.object_url(namespace, name)?);
        let response = self.authorize(request).send().await?;
        Self::handle_object(response, name).await
    }

    #[instrument(skip(self), fields(selector = %selector))]
    async fn list(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<ClusterObject>, ClusterError> {
        let request = self
            .http
            .get(self.collection_url(namespace)?)
            .query(&[("labelSelector", selector.to_string())]);
        let response = self.authorize(request).send().await?;

        if !response.status().is_success() {
            return Err(Self::error_for(response, RESOURCE).await);
        }
        let list: ObjectList = response.json().await?;
        Ok(list.items)
    }
}
