//! Static task-name to queue routing.
//!
//! Rules are glob patterns evaluated top to bottom; the first match wins and
//! names that match nothing go to the default queue. Vendor workloads get
//! their own queues so one slow integration cannot hold up the others.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::QueueError;

pub const DEFAULT_QUEUE: &str = "default";

/// Built-in rules, in evaluation order.
const BUILTIN_ROUTES: &[(&str, &str)] = &[
    ("notifications.send_chat", "telegram"),
    ("notifications.send_email", "email"),
    ("notifications.send_socket", "socket"),
    ("facebook.load_bills", "facebook_bills"),
    ("facebook.*", "facebook"),
    ("cards.*", "cards"),
    ("tracker.*", "tracker"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    pub pattern: String,
    pub queue: String,
}

impl RouteRule {
    pub fn new(pattern: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            queue: queue.into(),
        }
    }

    pub fn matches(&self, task_name: &str) -> bool {
        glob_match(&self.pattern, task_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingTable {
    #[serde(default = "default_queue_name")]
    pub default_queue: String,
    #[serde(default)]
    pub routes: Vec<RouteRule>,
}

fn default_queue_name() -> String {
    DEFAULT_QUEUE.to_string()
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self {
            default_queue: default_queue_name(),
            routes: BUILTIN_ROUTES
                .iter()
                .map(|(pattern, queue)| RouteRule::new(*pattern, *queue))
                .collect(),
        }
    }
}

impl RoutingTable {
    pub fn new(routes: Vec<RouteRule>, default_queue: impl Into<String>) -> Self {
        Self {
            default_queue: default_queue.into(),
            routes,
        }
    }

    /// Queue for a task name.
    pub fn resolve(&self, task_name: &str) -> &str {
        self.routes
            .iter()
            .find(|rule| rule.matches(task_name))
            .map(|rule| rule.queue.as_str())
            .unwrap_or(&self.default_queue)
    }

    /// Every queue the table can route to, default first, without duplicates.
    pub fn queues(&self) -> Vec<String> {
        let mut queues = vec![self.default_queue.clone()];
        for rule in &self.routes {
            if !queues.contains(&rule.queue) {
                queues.push(rule.queue.clone());
            }
        }
        queues
    }

    /// Parse a table from TOML:
    ///
    /// ```toml
    /// default_queue = "default"
    ///
    /// [[routes]]
    /// pattern = "facebook.*"
    /// queue = "facebook"
    /// ```
    pub fn from_toml_str(s: &str) -> Result<Self, QueueError> {
        let table: RoutingTable = toml::from_str(s)?;
        table.validate()?;
        Ok(table)
    }

    pub fn from_file(path: &Path) -> Result<Self, QueueError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    fn validate(&self) -> Result<(), QueueError> {
        if self.default_queue.trim().is_empty() {
            return Err(QueueError::Routing("default_queue must not be empty".to_string()));
        }
        for rule in &self.routes {
            if rule.pattern.is_empty() || rule.queue.trim().is_empty() {
                return Err(QueueError::Routing(format!(
                    "route '{}' -> '{}' needs a pattern and a queue",
                    rule.pattern, rule.queue
                )));
            }
        }
        Ok(())
    }
}

/// Shell-style match: `*` is any run of characters, `?` exactly one.
pub fn glob_match(pattern: &str, name: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();

    let (mut pi, mut ni) = (0, 0);
    // Position after the last `*` seen, and the name index it was tried at.
    let mut star: Option<(usize, usize)> = None;

    while ni < n.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == n[ni]) {
            pi += 1;
            ni += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi + 1, ni));
            pi += 1;
        } else if let Some((after_star, tried)) = star {
            pi = after_star;
            ni = tried + 1;
            star = Some((after_star, ni));
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}
