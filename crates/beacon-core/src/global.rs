//! Default pool - プロセス全体で共有する Pool
//!
//! payload は `serde_json::Value` なので、Rust の型を合わせなくても
//! プログラムの別々の部分で signal を共有できます。
//! 独立した signal の集合が必要なら自分で `Pool` を作ってください。

use std::sync::LazyLock;

use serde_json::Value;

use crate::error::{BoxError, SignalError};
use crate::pool::Pool;
use crate::receiver::Receiver;
use crate::signal::Signal;

static DEFAULT_POOL: LazyLock<Pool<Value>> = LazyLock::new(Pool::new);

/// default pool への参照
pub fn default_pool() -> &'static Pool<Value> {
    &DEFAULT_POOL
}

/// default pool の `name` に send
pub fn send(name: &str, value: &Value) -> Result<(), SignalError> {
    DEFAULT_POOL.send(name, value)
}

/// default pool の signal を取得（なければ作成）
pub fn get(name: &str) -> Signal<Value> {
    DEFAULT_POOL.get(name)
}

/// default pool の signal に receiver を登録（`default_pool().listen(..)` の省略形）
pub fn listen<F>(name: &str, callback: F) -> Receiver<Value>
where
    F: Fn(&Signal<Value>, &Value) -> Result<(), BoxError> + Send + Sync + 'static,
{
    DEFAULT_POOL.listen(name, callback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    // default pool はテスト間で共有されるので、名前はテストごとに分ける

    #[test]
    fn listen_and_send_through_default_pool() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let receiver = {
            let seen = seen.clone();
            listen("global.listen_and_send", move |_, value| {
                seen.lock().unwrap().push(value["name"].as_str().unwrap_or_default().to_string());
                Ok(())
            })
        };

        send("global.listen_and_send", &json!({ "name": "beacon" })).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["beacon".to_string()]);

        receiver.disconnect().unwrap();
        assert!(matches!(
            send("global.listen_and_send", &json!(null)),
            Err(SignalError::NoReceivers { .. })
        ));
    }

    #[test]
    fn get_is_shared_with_default_pool() {
        let signal = get("global.shared");
        assert!(signal.ptr_eq(&default_pool().get("global.shared")));
    }

    #[test]
    fn send_to_unknown_name_fails() {
        assert!(matches!(
            send("global.never_created", &json!(1)),
            Err(SignalError::SignalNotFound(_))
        ));
    }
}
