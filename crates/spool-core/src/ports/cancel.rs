//! Cancelable port - キャンセル確認の抽象化
//!
//! ダウンロードやパースなど、時間のかかる処理の途中で
//! `is_cancelled()` を確認して早めに抜けるためのインターフェースです。

/// Something a long-running collaborator can poll between steps.
pub trait Cancelable: Send + Sync {
    fn is_cancelled(&self) -> bool;
}

/// A token that is never cancelled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverCancelled;

impl Cancelable for NeverCancelled {
    fn is_cancelled(&self) -> bool {
        false
    }
}

impl Cancelable for std::sync::atomic::AtomicBool {
    fn is_cancelled(&self) -> bool {
        self.load(std::sync::atomic::Ordering::Acquire)
    }
}
