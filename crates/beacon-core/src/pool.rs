//! Pool - 名前 → Signal のレジストリ
//!
//! # 学習ポイント
//! - `RwLock<HashMap>`: 参照は read lock、作成・削除は write lock
//! - get-or-create は write lock の中で `entry()` を使い、同じ名前で 2 つ作られないようにする
//! - range はスナップショットを回すので、visitor の中から pool を触ってもデッドロックしない

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use crate::config::DispatchConfig;
use crate::dispatch::Deliveries;
use crate::error::{BoxError, SignalError};
use crate::receiver::Receiver;
use crate::signal::Signal;

/// Pool は名前 → Signal のレジストリ
///
/// signal は最初の get で作られ、delete されるまで残ります。
pub struct Pool<T> {
    signals: RwLock<HashMap<String, Signal<T>>>,
    config: DispatchConfig,
}

impl<T: Send + Sync + 'static> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> Pool<T> {
    /// 新しい Pool を作成（デフォルト設定）
    pub fn new() -> Self {
        Self::with_config(DispatchConfig::default())
    }

    /// 全 signal を `config` で作る Pool を作成
    pub fn with_config(config: DispatchConfig) -> Self {
        Self {
            signals: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// `name` の signal を取得（なければ空の signal を作成）
    pub fn get(&self, name: &str) -> Signal<T> {
        if let Some(signal) = self.read().get(name) {
            return signal.clone();
        }

        let mut signals = self.write();
        signals
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(signal = %name, "signal created");
                Signal::with_config(name, self.config)
            })
            .clone()
    }

    /// `name` の登録を削除
    ///
    /// receiver は削除された signal に接続されたまま。
    /// 返り値やその clone を持っていれば引き続き使えます。
    pub fn delete(&self, name: &str) -> Option<Signal<T>> {
        let removed = self.write().remove(name);
        if removed.is_some() {
            debug!(signal = %name, "signal deleted");
        }
        removed
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// 登録済みの signal 名（順序は不定）
    pub fn names(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// 全 signal を不定順に訪問（`visit` が `false` を返したら終了）
    pub fn range<F>(&self, mut visit: F)
    where
        F: FnMut(&Signal<T>) -> bool,
    {
        let snapshot: Vec<Signal<T>> = self.read().values().cloned().collect();
        for signal in &snapshot {
            if !visit(signal) {
                break;
            }
        }
    }

    /// `name` の signal に send（未登録なら `SignalNotFound`）
    pub fn send(&self, name: &str, value: &T) -> Result<(), SignalError> {
        self.lookup(name)?.send(value)
    }

    /// `name` の signal に send_async
    pub fn send_async(&self, name: &str, value: T) -> Result<Deliveries, SignalError> {
        Ok(self.lookup(name)?.send_async(value))
    }

    /// Pool 内の全 signal に send
    ///
    /// 最初に失敗した signal のエラーを返して止まるので、
    /// 残りの signal には届かないことがあります。
    pub fn send_global(&self, value: &T) -> Result<(), SignalError> {
        let mut result = Ok(());
        self.range(|signal| {
            result = signal.send(value);
            result.is_ok()
        });
        result
    }

    /// get してから send
    pub fn create_or_send(&self, name: &str, value: &T) -> Result<(), SignalError> {
        self.get(name).send(value)
    }

    /// `callback` を包む receiver を作り、`name` の signal に接続
    pub fn listen<F>(&self, name: &str, callback: F) -> Receiver<T>
    where
        F: Fn(&Signal<T>, &T) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let receiver = Receiver::new(callback);
        // 新しい receiver はどこにも接続されていないので connect は失敗しない
        let _ = self.get(name).connect(std::slice::from_ref(&receiver));
        receiver
    }

    fn lookup(&self, name: &str) -> Result<Signal<T>, SignalError> {
        self.read()
            .get(name)
            .cloned()
            .ok_or_else(|| SignalError::SignalNotFound(name.to_string()))
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Signal<T>>> {
        self.signals.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Signal<T>>> {
        self.signals.write().unwrap_or_else(PoisonError::into_inner)
    }
}
