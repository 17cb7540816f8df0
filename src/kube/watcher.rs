use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use super::client::KubeClient;
use crate::relay::{ResourceHandler, WatchSource};
use crate::shutdown::Shutdown;
use crate::{ResourceMeta, Result};

// Slack on top of the server-side watch timeout before a silent stream is
// treated as dead.
const STALL_MARGIN: Duration = Duration::from_secs(30);
const HTTP_GONE: u16 = 410;

#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Restrict the watch to one namespace; `None` watches all of them.
    pub namespace: Option<String>,
    /// Server-side lifetime of a single watch request.
    pub watch_timeout: Duration,
    pub retry_delay: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            watch_timeout: Duration::from_secs(300),
            retry_delay: Duration::from_secs(2),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
enum WatchEventType {
    Added,
    Modified,
    Deleted,
    Bookmark,
    Error,
}

#[derive(Deserialize, Debug)]
struct WatchEvent {
    #[serde(rename = "type")]
    kind: WatchEventType,
    object: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Continue,
    Rewatch,
    Relist,
}

/// Last known state of every pod, keyed by `namespace/name`.
#[derive(Default)]
struct PodStore {
    objects: HashMap<String, Value>,
}

impl PodStore {
    fn len(&self) -> usize {
        self.objects.len()
    }

    /// Replaces the store with a fresh LIST, reporting the difference.
    fn reconcile(&mut self, items: Vec<Value>, handler: &dyn ResourceHandler) {
        let previous = std::mem::take(&mut self.objects);
        for item in items {
            let Some(key) = object_key(&item) else {
                handler.on_add(&item);
                continue;
            };
            match previous.get(&key) {
                None => handler.on_add(&item),
                Some(old) if resource_version(old) != resource_version(&item) => {
                    handler.on_update(Some(old), &item)
                }
                Some(_) => {}
            }
            self.objects.insert(key, item);
        }
        for (key, old) in &previous {
            if !self.objects.contains_key(key) {
                handler.on_delete(old);
            }
        }
    }

    fn apply(&mut self, event: WatchEvent, version: &mut String, handler: &dyn ResourceHandler) -> Step {
        if let Some(rv) = resource_version(&event.object) {
            if event.kind != WatchEventType::Error {
                *version = rv.to_string();
            }
        }
        let object = event.object;
        match event.kind {
            WatchEventType::Added | WatchEventType::Modified => {
                let old = match object_key(&object) {
                    Some(key) => self.objects.insert(key, object.clone()),
                    None => None,
                };
                match old {
                    Some(old) => handler.on_update(Some(&old), &object),
                    None => handler.on_add(&object),
                }
                Step::Continue
            }
            WatchEventType::Deleted => {
                if let Some(key) = object_key(&object) {
                    self.objects.remove(&key);
                }
                handler.on_delete(&object);
                Step::Continue
            }
            WatchEventType::Bookmark => Step::Continue,
            WatchEventType::Error => {
                let code = object.get("code").and_then(Value::as_u64);
                let message = object.get("message").and_then(Value::as_str).unwrap_or("");
                if code == Some(u64::from(HTTP_GONE)) {
                    debug!("watch version {version} expired: {message}");
                } else {
                    warn!("watch error event (code {code:?}): {message}");
                }
                Step::Relist
            }
        }
    }
}

fn object_key(object: &Value) -> Option<String> {
    ResourceMeta::extract(object)
        .ok()
        .map(|meta| format!("{}/{}", meta.namespace, meta.name))
}

fn resource_version(object: &Value) -> Option<&str> {
    object.get("metadata")?.get("resourceVersion")?.as_str()
}

/// Splits a chunked body into newline-terminated records.
#[derive(Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if !line.is_empty() {
                lines.push(line);
            }
        }
        lines
    }
}

/// Watches pods through the Kubernetes API and feeds a [`ResourceHandler`].
pub struct PodWatcher {
    client: KubeClient,
    config: WatchConfig,
    shutdown: Shutdown,
}

/// The running watch task.
pub struct WatchHandle {
    task: JoinHandle<()>,
}

impl WatchHandle {
    /// Waits for the watch task to exit (it does so once shutdown fires).
    pub async fn join(self) {
        if let Err(err) = self.task.await {
            if err.is_panic() {
                warn!("pod watch task panicked: {err}");
            }
        }
    }
}

impl PodWatcher {
    pub fn new(client: KubeClient, config: WatchConfig, shutdown: Shutdown) -> Self {
        Self {
            client,
            config,
            shutdown,
        }
    }

    fn namespace(&self) -> Option<&str> {
        self.config.namespace.as_deref()
    }

    async fn relist(&self, store: &mut PodStore, handler: &dyn ResourceHandler) -> Result<String> {
        let list = self.client.list_pods(self.namespace()).await?;
        let version = list.metadata.resource_version;
        store.reconcile(list.items, handler);
        Ok(version)
    }

    async fn watch_stream(
        &self,
        store: &mut PodStore,
        version: &mut String,
        handler: &dyn ResourceHandler,
    ) -> Result<Step> {
        let mut response = self
            .client
            .watch_pods(self.namespace(), version, self.config.watch_timeout)
            .await?;
        let stall = self.config.watch_timeout + STALL_MARGIN;
        let mut lines = LineBuffer::default();
        loop {
            let chunk = timeout(stall, response.chunk())
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "watch stream stalled"))??;
            let Some(chunk) = chunk else {
                return Ok(Step::Rewatch);
            };
            for line in lines.push(&chunk) {
                let event = match serde_json::from_slice::<WatchEvent>(&line) {
                    Ok(event) => event,
                    Err(err) => {
                        warn!("skipping malformed watch event: {err}");
                        continue;
                    }
                };
                if store.apply(event, version, handler) == Step::Relist {
                    return Ok(Step::Relist);
                }
            }
        }
    }

    async fn cycle(
        &self,
        relist: bool,
        store: &mut PodStore,
        version: &mut String,
        handler: &dyn ResourceHandler,
    ) -> Result<Step> {
        if relist {
            *version = self.relist(store, handler).await?;
            debug!("relisted {} pods at resourceVersion {version}", store.len());
        }
        self.watch_stream(store, version, handler).await
    }

    async fn run(self, handler: Arc<dyn ResourceHandler>, mut store: PodStore, mut version: String) {
        let mut shutdown = self.shutdown.clone();
        let mut relist = false;
        loop {
            let outcome = tokio::select! {
                _ = shutdown.wait() => break,
                outcome = self.cycle(relist, &mut store, &mut version, handler.as_ref()) => outcome,
            };
            relist = match outcome {
                Ok(Step::Relist) => true,
                Ok(_) => false,
                Err(err) => {
                    warn!(
                        "pod watch failed: {err}; retrying in {:?}",
                        self.config.retry_delay
                    );
                    tokio::select! {
                        _ = shutdown.wait() => break,
                        _ = sleep(self.config.retry_delay) => {}
                    }
                    true
                }
            };
        }
        info!("pod watch stopped");
    }
}

impl WatchSource for PodWatcher {
    type Subscription = WatchHandle;

    fn subscribe(
        self,
        handler: Arc<dyn ResourceHandler>,
    ) -> impl Future<Output = Result<Self::Subscription>> + Send {
        async move {
            let mut store = PodStore::default();
            let version = self.relist(&mut store, handler.as_ref()).await?;
            info!(
                "watching pods in {} ({} existing, resourceVersion {version})",
                self.namespace().unwrap_or("all namespaces"),
                store.len()
            );
            let task = tokio::spawn(self.run(handler, store, version));
            Ok(WatchHandle { task })
        }
    }
}
