use std::time::Duration;

use reqwest::{Certificate, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use super::config::ClusterConfig;
use crate::{Error, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const LIST_TIMEOUT: Duration = Duration::from_secs(60);

/// A LIST response: the items plus the version to watch from.
#[derive(Deserialize, Debug)]
pub struct ObjectList {
    #[serde(default)]
    pub metadata: ListMeta,
    #[serde(default)]
    pub items: Vec<Value>,
}

#[derive(Deserialize, Debug, Default)]
pub struct ListMeta {
    #[serde(rename = "resourceVersion", default)]
    pub resource_version: String,
}

#[derive(Deserialize)]
struct Status {
    #[serde(default)]
    message: String,
}

/// Minimal pod LIST/WATCH client for the core v1 API.
pub struct KubeClient {
    http: reqwest::Client,
    server: Url,
    token: Option<String>,
}

impl KubeClient {
    pub fn new(config: &ClusterConfig) -> Result<Self> {
        // No overall request timeout: watch responses are meant to stay open.
        let mut builder = reqwest::Client::builder().connect_timeout(CONNECT_TIMEOUT);
        if let Some(pem) = &config.ca_pem {
            builder = builder.add_root_certificate(Certificate::from_pem(pem)?);
        }
        Ok(Self {
            http: builder.build()?,
            server: config.server.clone(),
            token: config.token.clone(),
        })
    }

    pub fn pods_url(&self, namespace: Option<&str>) -> Result<Url> {
        let path = match namespace {
            Some(ns) => format!("api/v1/namespaces/{ns}/pods"),
            None => "api/v1/pods".to_string(),
        };
        self.server
            .join(&path)
            .map_err(|err| Error::Config(format!("invalid pods path {path}: {err}")))
    }

    pub async fn list_pods(&self, namespace: Option<&str>) -> Result<ObjectList> {
        let url = self.pods_url(namespace)?;
        let response = self.get(url).timeout(LIST_TIMEOUT).send().await?;
        Ok(check(response).await?.json::<ObjectList>().await?)
    }

    /// Opens a watch stream of newline-delimited watch events.
    pub async fn watch_pods(
        &self,
        namespace: Option<&str>,
        resource_version: &str,
        timeout: Duration,
    ) -> Result<Response> {
        let mut url = self.pods_url(namespace)?;
        url.query_pairs_mut()
            .append_pair("watch", "true")
            .append_pair("allowWatchBookmarks", "true")
            .append_pair("resourceVersion", resource_version)
            .append_pair("timeoutSeconds", &timeout.as_secs().max(1).to_string());
        let response = self.get(url).send().await?;
        check(response).await
    }

    fn get(&self, url: Url) -> RequestBuilder {
        let request = self.http.get(url).header("Accept", "application/json");
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Status>(&body)
        .map(|status| status.message)
        .ok()
        .filter(|message| !message.is_empty())
        .unwrap_or(body);
    Err(Error::Api {
        status: status.as_u16(),
        message,
    })
}
