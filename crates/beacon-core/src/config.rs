//! Config - send_async の配送設定

use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

/// DispatchConfig は `send_async` が callback をどう実行するかの設定
///
/// デフォルトは上限なし（receiver ごとに 1 タスク、全部同時に実行可）。
/// bounded でも receiver ごとに 1 タスクを作るが、同時に動く callback は
/// `max_concurrency` 個まで。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub max_concurrency: Option<NonZeroUsize>,
}

impl DispatchConfig {
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// 同時実行数の上限付き
    pub fn bounded(max_concurrency: NonZeroUsize) -> Self {
        Self {
            max_concurrency: Some(max_concurrency),
        }
    }

    pub fn is_bounded(&self) -> bool {
        self.max_concurrency.is_some()
    }
}
