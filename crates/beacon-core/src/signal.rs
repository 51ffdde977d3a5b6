//! Signal - 名前付きのブロードキャストチャネル
//!
//! # 学習ポイント
//! - `Arc<Inner>` による安価な clone（clone 同士は同じ状態を共有）
//! - `Mutex<Vec<Receiver>>` で接続順を保持（接続順 = 同期配送の順序）
//! - 同期 send はロックを配送の間ずっと保持、send_async は起動時だけ保持

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, trace, warn};

use crate::config::DispatchConfig;
use crate::dispatch::{self, Deliveries};
use crate::error::{BoxError, CompositeError, SignalError};
use crate::receiver::{Receiver, ReceiverId};

/// Signal は順序付きの receiver 集合を持つ名前付きチャネル
pub struct Signal<T>(Arc<SignalInner<T>>);

struct SignalInner<T> {
    name: String,
    receivers: Mutex<Vec<Receiver<T>>>,
    config: DispatchConfig,
}

/// receiver が持つ所有しない参照
pub(crate) struct WeakSignal<T>(Weak<SignalInner<T>>);

impl<T> WeakSignal<T> {
    pub(crate) fn upgrade(&self) -> Option<Signal<T>> {
        self.0.upgrade().map(Signal)
    }

    pub(crate) fn points_to(&self, signal: &Signal<T>) -> bool {
        std::ptr::eq(self.0.as_ptr(), Arc::as_ptr(&signal.0))
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: Send + Sync + 'static> Signal<T> {
    /// 新しい Signal を作成（デフォルト設定）
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, DispatchConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: DispatchConfig) -> Self {
        Self(Arc::new(SignalInner {
            name: name.into(),
            receivers: Mutex::new(Vec::new()),
            config,
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.0.config
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// 接続中の receiver のスナップショット（配送順）
    pub fn receivers(&self) -> Vec<Receiver<T>> {
        self.lock().clone()
    }

    /// 2 つのハンドルが同じ signal を指しているか
    pub fn ptr_eq(&self, other: &Signal<T>) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// receiver を渡された順に接続
    ///
    /// すでにこの signal の一覧にある ID はスキップ。
    /// 別の生きている signal に接続中の receiver があれば全体が失敗し、何も接続されません。
    pub fn connect(&self, receivers: &[Receiver<T>]) -> Result<(), SignalError> {
        let mut attached = self.lock();
        let mut known: HashSet<ReceiverId> = attached.iter().map(Receiver::id).collect();

        let mut added: Vec<Receiver<T>> = Vec::with_capacity(receivers.len());
        for receiver in receivers {
            if !known.insert(receiver.id()) {
                continue;
            }
            if let Err(err) = receiver.attach(self) {
                for receiver in &added {
                    receiver.detach_from(self);
                }
                return Err(err);
            }
            added.push(receiver.clone());
        }

        debug!(signal = %self.name(), connected = added.len(), "receivers connected");
        attached.extend(added);
        Ok(())
    }

    /// `receivers` と同じ ID の receiver をすべて切断
    ///
    /// # Panics
    /// `receivers` が空のとき
    pub fn disconnect(&self, receivers: &[Receiver<T>]) {
        assert!(
            !receivers.is_empty(),
            "did not provide any receivers to disconnect"
        );

        let targets: HashSet<ReceiverId> = receivers.iter().map(Receiver::id).collect();
        let mut attached = self.lock();
        let before = attached.len();
        attached.retain(|receiver| {
            if targets.contains(&receiver.id()) {
                receiver.detach_from(self);
                return false;
            }
            true
        });

        debug!(
            signal = %self.name(),
            disconnected = before - attached.len(),
            "receivers disconnected"
        );
    }

    /// すべての receiver を切断
    pub fn clear(&self) {
        let mut attached = self.lock();
        for receiver in attached.drain(..) {
            receiver.detach_from(self);
        }
        debug!(signal = %self.name(), "receivers cleared");
    }

    /// 接続順に全 receiver へ `value` を配送
    ///
    /// 途中で失敗しても残りの receiver は呼ばれ、失敗は接続順に
    /// 1 つの `SignalError::Composite` にまとめて返ります。
    ///
    /// 配送中はロックを保持するので、callback から同じ signal に
    /// connect / disconnect / clear / send するとデッドロックします。
    pub fn send(&self, value: &T) -> Result<(), SignalError> {
        let receivers = self.lock();
        if receivers.is_empty() {
            return Err(SignalError::NoReceivers {
                signal: self.name().to_string(),
            });
        }

        trace!(signal = %self.name(), receivers = receivers.len(), "send");
        let errors: Vec<BoxError> = receivers
            .iter()
            .filter_map(|receiver| receiver.receive(self, value).err())
            .collect();
        drop(receivers);

        if errors.is_empty() {
            return Ok(());
        }
        warn!(signal = %self.name(), failed = errors.len(), "receivers failed");
        Err(CompositeError::new(errors).into())
    }

    /// 全 receiver へ並行に `value` を配送
    ///
    /// すぐに返ります。ハンドルはファンアウト開始時の receiver ごとに
    /// 1 件の結果を完了順に返し、その後閉じます。receiver が 0 件でもエラーにはならず、
    /// 空のまま閉じます。Tokio runtime の外から呼んでもよい。
    pub fn send_async(&self, value: T) -> Deliveries {
        dispatch::spawn_fan_out(self.clone(), value)
    }

    pub(crate) fn downgrade(&self) -> WeakSignal<T> {
        WeakSignal(Arc::downgrade(&self.0))
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Vec<Receiver<T>>> {
        self.0.receivers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // send 中の callback から format されてもブロックしない
        let receivers = self.0.receivers.try_lock().map(|r| r.len()).ok();
        f.debug_struct("Signal")
            .field("name", &self.name())
            .field("receivers", &receivers)
            .field("config", self.config())
            .finish()
    }
}
