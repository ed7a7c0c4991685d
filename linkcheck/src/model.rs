/// Model module for the LinkCheck service
///
/// This module defines the data structures shared by the store, the task queue
/// and the HTTP layer: link statuses, batches of links, pending markers and the
/// persisted state aggregate.
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// Identifier of a batch of links. Assigned by the store, starting at 1.
pub type LinksNum = u64;

/// Reachability of a single URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkStatus {
    #[serde(rename = "available")]
    Available,
    #[serde(rename = "not available")]
    NotAvailable,
}

impl LinkStatus {
    /// Short form used in reports ("a" / "na").
    pub fn short(&self) -> &'static str {
        match self {
            LinkStatus::Available => "a",
            LinkStatus::NotAvailable => "na",
        }
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkStatus::Available => write!(f, "available"),
            LinkStatus::NotAvailable => write!(f, "not available"),
        }
    }
}

/// A user-submitted group of URLs checked together.
///
/// # Fields
/// * `links_num` - Identifier of the batch
/// * `links` - Status of every URL in the batch, keyed by URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinksSet {
    pub links_num: LinksNum,
    #[serde(default)]
    pub links: BTreeMap<String, LinkStatus>,
}

/// Phase of a pending marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPhase {
    Pending,
    Processing,
}

/// Durable record that a (batch, URL) pair still needs a queue-driven check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTask {
    pub links_num: LinksNum,
    pub url: String,
    #[serde(rename = "status")]
    pub phase: TaskPhase,
}

impl PendingTask {
    pub fn new(links_num: LinksNum, url: impl Into<String>) -> Self {
        Self {
            links_num,
            url: url.into(),
            phase: TaskPhase::Pending,
        }
    }

    pub fn matches(&self, links_num: LinksNum, url: &str) -> bool {
        self.links_num == links_num && self.url == url
    }
}

/// The whole persisted application state.
///
/// Maps are ordered so that serializing the same state twice yields identical bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    #[serde(default)]
    pub links_sets: BTreeMap<LinksNum, LinksSet>,
    #[serde(default = "State::first_links_num")]
    pub next_links_num: LinksNum,
    #[serde(default)]
    pub pending_tasks: Vec<PendingTask>,
}

impl State {
    fn first_links_num() -> LinksNum {
        1
    }
}

impl Default for State {
    fn default() -> Self {
        Self {
            links_sets: BTreeMap::new(),
            next_links_num: Self::first_links_num(),
            pending_tasks: Vec::new(),
        }
    }
}

/// A unit of work travelling through the dispatch channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub links_num: LinksNum,
    pub url: String,
}

impl From<&PendingTask> for Task {
    fn from(pending: &PendingTask) -> Self {
        Self {
            links_num: pending.links_num,
            url: pending.url.clone(),
        }
    }
}
