//! Kubernetes pod watch source.
//!
//! Mirrors what a client-go informer gives its handlers: an initial LIST that
//! reports every existing pod as added, then a WATCH from the list's
//! `resourceVersion`, relisting whenever that version expires or the stream
//! breaks.

pub mod client;
pub mod config;
pub mod watcher;

pub use client::KubeClient;
pub use config::ClusterConfig;
pub use watcher::{PodWatcher, WatchConfig, WatchHandle};
