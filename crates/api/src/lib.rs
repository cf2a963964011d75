//! Keel public API: the StatefulSet detail orchestrator and the collaborator traits it runs on.
//!
//! Frontends (CLI, request handlers) build a [`DetailOrchestrator`] from [`Sources`] and call
//! [`DetailOrchestrator::get_detail`]. The kube-backed sources live in [`cluster`]; [`mock`] holds
//! in-memory doubles for tests.

#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod cluster;
pub mod config;
pub mod mock;
pub mod orchestrator;
pub mod sources;

pub use config::{DetailConfig, Schedule};
pub use orchestrator::DetailOrchestrator;
pub use sources::{EventSource, MetricsSource, NoMetrics, PodSource, RecordSource, Sources};
pub use keel_core::{dataselect::DataSelectQuery, detail::StatefulSetDetail, ResourceIdentity};
pub use tokio_util::sync::CancellationToken;

/// Which lookup of a detail call produced an error.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FetchStage {
    Record,
    Pods,
    PodInfo,
    Events,
}

impl FetchStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStage::Record => "record",
            FetchStage::Pods => "pods",
            FetchStage::PodInfo => "pod_info",
            FetchStage::Events => "events",
        }
    }
}

impl fmt::Display for FetchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by collaborators.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("not_found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SourceError {
    /// Classify a kube lookup failure, keeping API 404s distinct.
    pub fn from_kube(e: anyhow::Error) -> Self {
        if keel_kubehub::is_not_found(&e) {
            SourceError::NotFound(format!("{e:#}"))
        } else {
            SourceError::Other(e)
        }
    }
}

/// Errors returned by [`DetailOrchestrator::get_detail`].
#[derive(Debug, thiserror::Error)]
pub enum DetailError {
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("upstream({stage}): {source}")]
    Upstream {
        stage: FetchStage,
        #[source]
        source: SourceError,
    },
    #[error("cancelled")]
    Cancelled,
}

impl DetailError {
    /// Stable label for mapping onto transport responses.
    pub fn kind(&self) -> &'static str {
        match self {
            DetailError::NotFound(_) => "not_found",
            DetailError::Upstream { .. } => "upstream",
            DetailError::Cancelled => "cancelled",
        }
    }

    pub fn stage(&self) -> Option<FetchStage> {
        match self {
            DetailError::Upstream { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

pub type DetailResult<T> = Result<T, DetailError>;
