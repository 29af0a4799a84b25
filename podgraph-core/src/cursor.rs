//! Stateless pagination cursors
//!
//! A cursor is URL-safe base64 (no padding) of `v1:<offset>`. Every paginated
//! read in the workspace uses this single encoding.

use crate::error::{CoreError, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};

const CURSOR_VERSION: &str = "v1";

/// Encode a numeric offset as an opaque cursor
pub fn encode_cursor(offset: usize) -> String {
    URL_SAFE_NO_PAD.encode(format!("{CURSOR_VERSION}:{offset}"))
}

/// Decode a cursor produced by [`encode_cursor`]
pub fn decode_cursor(cursor: &str) -> Result<usize> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|e| CoreError::invalid_cursor(e.to_string()))?;
    let text = String::from_utf8(bytes).map_err(|e| CoreError::invalid_cursor(e.to_string()))?;
    let (version, offset) = text
        .split_once(':')
        .ok_or_else(|| CoreError::invalid_cursor("missing version"))?;
    if version != CURSOR_VERSION {
        return Err(CoreError::invalid_cursor(format!(
            "unsupported cursor version '{version}'"
        )));
    }
    offset
        .parse::<usize>()
        .map_err(|_| CoreError::invalid_cursor(format!("invalid offset '{offset}'")))
}

/// One page of results with the cursor of the next page, if any
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
        }
    }

    /// Slice one page out of `items` starting at `cursor`
    pub fn from_items<I>(items: I, cursor: Option<&str>, limit: usize) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
    {
        let offset = cursor.map(decode_cursor).transpose()?.unwrap_or(0);
        let limit = limit.max(1);
        let mut iter = items.into_iter().skip(offset);
        let page: Vec<T> = iter.by_ref().take(limit).collect();
        let next_cursor = if iter.next().is_some() {
            Some(encode_cursor(offset + page.len()))
        } else {
            None
        };
        Ok(Self {
            items: page,
            next_cursor,
        })
    }
}
