use serde::{Deserialize, Serialize};

/// Largest page any list endpoint returns, whatever the caller asks for.
pub const MAX_PAGE_LIMIT: usize = 500;

const DEFAULT_PAGE_LIMIT: usize = 50;

/// Offset pagination for list endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ListParams {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    DEFAULT_PAGE_LIMIT
}

impl Default for ListParams {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl ListParams {
    pub fn new(limit: Option<usize>, offset: Option<usize>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_PAGE_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }

    /// `(LIMIT, OFFSET)` ready to bind, limit clamped to `1..=MAX_PAGE_LIMIT`.
    pub fn sql_window(&self) -> (i64, i64) {
        let limit = self.limit.clamp(1, MAX_PAGE_LIMIT);
        (limit as i64, self.offset.min(i64::MAX as usize) as i64)
    }
}

/// One page of a listing plus the size of the whole result set.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResult<T: Serialize> {
    pub items: Vec<T>,
    pub total: usize,
    pub has_more: bool,
}

impl<T: Serialize> ListResult<T> {
    pub fn new(items: Vec<T>, total: usize, params: &ListParams) -> Self {
        let has_more = params.offset.saturating_add(items.len()) < total;
        Self {
            items,
            total,
            has_more,
        }
    }
}

/// Random 32-char hex identifier.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
