use std::env;
use std::fmt;
use std::fs;
use std::path::Path;

use url::Url;

use crate::{Error, Result};

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Where the API server lives and how to authenticate to it.
#[derive(Clone)]
pub struct ClusterConfig {
    pub server: Url,
    pub token: Option<String>,
    /// Extra root certificate(s), PEM encoded.
    pub ca_pem: Option<Vec<u8>>,
}

impl ClusterConfig {
    /// Service-account configuration available to a pod running in the cluster.
    pub fn in_cluster() -> Result<Self> {
        let host = env::var("KUBERNETES_SERVICE_HOST").map_err(|_| {
            Error::Config("KUBERNETES_SERVICE_HOST is not set; not running in a cluster".into())
        })?;
        let port = env::var("KUBERNETES_SERVICE_PORT")
            .map_err(|_| Error::Config("KUBERNETES_SERVICE_PORT is not set".into()))?;
        let host = if host.contains(':') {
            format!("[{host}]")
        } else {
            host
        };
        let dir = Path::new(SERVICE_ACCOUNT_DIR);
        Self::from_parts(
            &format!("https://{host}:{port}"),
            Some(&dir.join("token")),
            Some(&dir.join("ca.crt")),
        )
    }

    pub fn from_parts(
        server: &str,
        token_file: Option<&Path>,
        ca_file: Option<&Path>,
    ) -> Result<Self> {
        let mut server = Url::parse(server)
            .map_err(|err| Error::Config(format!("invalid api server url {server}: {err}")))?;
        if !matches!(server.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "unsupported api server scheme: {}",
                server.scheme()
            )));
        }
        // Relative joins must extend any path prefix rather than replace it.
        if !server.path().ends_with('/') {
            let path = format!("{}/", server.path());
            server.set_path(&path);
        }

        let token = token_file
            .map(fs::read_to_string)
            .transpose()?
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());
        let ca_pem = ca_file.map(fs::read).transpose()?;

        Ok(Self {
            server,
            token,
            ca_pem,
        })
    }
}

impl fmt::Debug for ClusterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterConfig")
            .field("server", &self.server.as_str())
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("ca_pem", &self.ca_pem.as_ref().map(Vec::len))
            .finish()
    }
}
