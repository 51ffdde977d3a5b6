//! Errors - シグナル配送のエラー型
//!
//! - `SignalError`: 呼び出し側に返る唯一のエラー型
//! - `CompositeError`: 1 回の配送で失敗した receiver のエラーをまとめたもの

use std::fmt;

use thiserror::Error;

use crate::receiver::ReceiverId;

/// receiver のコールバックが返すエラー
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// SignalError は配送・接続操作のエラー
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("no receivers connected to signal={signal}")]
    NoReceivers { signal: String },

    #[error("signal not found: {0}")]
    SignalNotFound(String),

    #[error("receiver is not connected to a signal")]
    NotConnected,

    #[error("receiver {receiver} is already connected to signal={signal}")]
    AlreadyConnected { receiver: ReceiverId, signal: String },

    #[error("receiver panicked: {0}")]
    ReceiverPanicked(String),

    #[error(transparent)]
    Composite(#[from] CompositeError),
}

impl SignalError {
    /// ログ用の短い固定ラベル
    pub fn as_label(&self) -> &'static str {
        match self {
            SignalError::NoReceivers { .. } => "signal_no_receivers",
            SignalError::SignalNotFound(_) => "signal_not_found",
            SignalError::NotConnected => "receiver_not_connected",
            SignalError::AlreadyConnected { .. } => "receiver_already_connected",
            SignalError::ReceiverPanicked(_) => "receiver_panicked",
            SignalError::Composite(_) => "signal_composite",
        }
    }

    /// composite なら receiver ごとの失敗を借用
    pub fn composite(&self) -> Option<&CompositeError> {
        match self {
            SignalError::Composite(composite) => Some(composite),
            _ => None,
        }
    }

    /// composite を取り出す（違えば元のエラーを返す）
    pub fn into_composite(self) -> Result<CompositeError, SignalError> {
        match self {
            SignalError::Composite(composite) => Ok(composite),
            other => Err(other),
        }
    }
}

/// CompositeError は 1 回の dispatch で失敗した receiver のエラー一覧
///
/// `errors` の順序は同期 send では receiver の接続順、
/// 非同期 send では完了順になります。
pub struct CompositeError {
    message: String,
    errors: Vec<BoxError>,
}

impl CompositeError {
    pub fn new(errors: Vec<BoxError>) -> Self {
        Self {
            message: format!("error sending signal to {} receivers", errors.len()),
            errors,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// 失敗した receiver の数
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[BoxError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<BoxError> {
        self.errors
    }
}

impl fmt::Debug for CompositeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeError")
            .field("message", &self.message)
            .field("errors", &self.errors)
            .finish()
    }
}

impl fmt::Display for CompositeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CompositeError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn boom(msg: &str) -> BoxError {
        msg.to_string().into()
    }

    #[test]
    fn composite_counts_underlying_errors() {
        let composite = CompositeError::new(vec![boom("a"), boom("b")]);
        assert_eq!(composite.len(), 2);
        assert_eq!(composite.message(), "error sending signal to 2 receivers");
        assert_eq!(composite.to_string(), composite.message());

        let messages: Vec<String> = composite.errors().iter().map(|e| e.to_string()).collect();
        assert_eq!(messages, vec!["a", "b"]);
    }

    #[test]
    fn composite_is_distinguishable_from_plain_errors() {
        let err = SignalError::from(CompositeError::new(vec![boom("x")]));
        assert_eq!(err.composite().map(CompositeError::len), Some(1));
        assert_eq!(err.as_label(), "signal_composite");

        let plain = SignalError::SignalNotFound("missing".into());
        assert!(plain.composite().is_none());
        assert!(matches!(
            plain.into_composite(),
            Err(SignalError::SignalNotFound(name)) if name == "missing"
        ));
    }

    #[test]
    fn into_composite_hands_back_the_list() {
        let err = SignalError::Composite(CompositeError::new(vec![boom("1"), boom("2")]));
        let errors = err.into_composite().unwrap().into_errors();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[1].to_string(), "2");
    }
}
