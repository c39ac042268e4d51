use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Algorithmic,
    DesignLowLevel,
    DesignHighLevel,
    Miscellaneous,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Algorithmic,
        Category::DesignLowLevel,
        Category::DesignHighLevel,
        Category::Miscellaneous,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Algorithmic => "algorithmic",
            Category::DesignLowLevel => "design_low_level",
            Category::DesignHighLevel => "design_high_level",
            Category::Miscellaneous => "miscellaneous",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "algorithmic" | "algo" | "dsa" => Some(Category::Algorithmic),
            "design_low_level" | "design-low-level" | "lld" => Some(Category::DesignLowLevel),
            "design_high_level" | "design-high-level" | "hld" => Some(Category::DesignHighLevel),
            "miscellaneous" | "misc" => Some(Category::Miscellaneous),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Category::Algorithmic => "Algorithmic",
            Category::DesignLowLevel => "Low-Level Design",
            Category::DesignHighLevel => "High-Level Design",
            Category::Miscellaneous => "Miscellaneous",
        }
    }

    // An empty list means any subcategory is accepted
    pub fn allowed_subcategories(&self) -> &'static [&'static str] {
        match self {
            Category::Algorithmic => &[
                "arrays",
                "strings",
                "hashing",
                "two-pointers",
                "sliding-window",
                "stack",
                "binary-search",
                "linked-list",
                "trees",
                "tries",
                "heap",
                "backtracking",
                "graphs",
                "dynamic-programming",
                "greedy",
                "intervals",
                "math",
                "bit-manipulation",
            ],
            Category::DesignLowLevel => &[
                "object-oriented",
                "design-patterns",
                "concurrency",
                "api-design",
                "machine-coding",
            ],
            Category::DesignHighLevel => &[
                "fundamentals",
                "storage",
                "caching",
                "messaging",
                "scalability",
                "case-study",
            ],
            Category::Miscellaneous => &[],
        }
    }

    pub fn accepts_subcategory(&self, subcategory: &str) -> bool {
        let allowed = self.allowed_subcategories();
        allowed.is_empty() || allowed.contains(&subcategory)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Catalog-level status of a user's relationship to an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Pending,
    InProgress,
    Done,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::Pending => "pending",
            ProgressStatus::InProgress => "in_progress",
            ProgressStatus::Done => "done",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" | "todo" => Some(ProgressStatus::Pending),
            "in_progress" | "in-progress" | "active" => Some(ProgressStatus::InProgress),
            "done" | "complete" | "completed" => Some(ProgressStatus::Done),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProgressStatus::Pending => "Pending",
            ProgressStatus::InProgress => "In Progress",
            ProgressStatus::Done => "Done",
        }
    }
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: i64,
    pub title: String,
    pub category: Category,
    pub subcategory: String,
    pub attachments: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewItem {
    pub title: String,
    pub category: Category,
    pub subcategory: String,
    pub attachments: BTreeMap<String, String>,
}

/// Per-user overlay row. Absent rows read back as [`Progress::pending`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub user_id: i64,
    pub item_id: i64,
    pub status: ProgressStatus,
    pub starred: bool,
    pub notes: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Progress {
    pub fn pending(user_id: i64, item_id: i64) -> Self {
        Self {
            user_id,
            item_id,
            status: ProgressStatus::Pending,
            starred: false,
            notes: String::new(),
            started_at: None,
            completed_at: None,
            updated_at: None,
        }
    }

    /// False for the implicit default of an item the user never touched.
    pub fn is_materialized(&self) -> bool {
        self.updated_at.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemWithProgress {
    pub item: CatalogItem,
    pub progress: Progress,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub item: ItemWithProgress,
    /// True when this completion finished the whole catalog
    pub cycle_completed: bool,
    pub stats: Stats,
}

#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    pub category: Option<Category>,
    pub status: Option<ProgressStatus>,
    pub starred_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStats {
    pub user_id: i64,
    pub completed_all_count: i64,
    pub current_streak: i64,
    pub longest_streak: i64,
    pub last_activity_date: Option<NaiveDate>,
}

impl UserStats {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            completed_all_count: 0,
            current_streak: 0,
            longest_streak: 0,
            last_activity_date: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusCounts {
    pub total: i64,
    pub pending: i64,
    pub in_progress: i64,
    pub done: i64,
}

impl StatusCounts {
    pub fn add(&mut self, status: ProgressStatus, n: i64) {
        self.total += n;
        match status {
            ProgressStatus::Pending => self.pending += n,
            ProgressStatus::InProgress => self.in_progress += n,
            ProgressStatus::Done => self.done += n,
        }
    }

    pub fn completion_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.done as f64 / self.total as f64) * 100.0
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stats {
    pub user_id: i64,
    pub total_items: i64,
    pub completed_items: i64,
    pub in_progress_items: i64,
    pub pending_items: i64,
    pub starred_items: i64,
    pub completed_all_count: i64,
    pub current_streak: i64,
    pub longest_streak: i64,
    pub last_activity_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubcategoryCounts {
    pub category: Category,
    pub subcategory: String,
    pub counts: StatusCounts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailedStats {
    pub summary: Stats,
    pub by_category: BTreeMap<Category, StatusCounts>,
    pub by_subcategory: Vec<SubcategoryCounts>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionItemStatus {
    Pending,
    Completed,
    Abandoned,
}

impl SessionItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionItemStatus::Pending => "pending",
            SessionItemStatus::Completed => "completed",
            SessionItemStatus::Abandoned => "abandoned",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(SessionItemStatus::Pending),
            "completed" | "done" => Some(SessionItemStatus::Completed),
            "abandoned" | "skipped" => Some(SessionItemStatus::Abandoned),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionItemStatus::Pending)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionItem {
    pub session_id: String,
    pub user_id: i64,
    pub item_id: i64,
    pub category: Category,
    pub status: SessionItemStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

// A review session is just the rows sharing a session_id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSession {
    pub session_id: String,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
    pub items: Vec<SessionItem>,
}

impl TestSession {
    pub fn is_closed(&self) -> bool {
        self.items.iter().all(|i| i.status.is_terminal())
    }

    pub fn pending_count(&self) -> usize {
        self.items
            .iter()
            .filter(|i| i.status == SessionItemStatus::Pending)
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eligibility {
    pub eligible: bool,
    pub reason: String,
}

impl Eligibility {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            eligible: true,
            reason: reason.into(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            eligible: false,
            reason: reason.into(),
        }
    }
}

// JSON output wrapper for CLI
#[derive(Debug, Serialize)]
pub struct JsonOutput<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> JsonOutput<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}
