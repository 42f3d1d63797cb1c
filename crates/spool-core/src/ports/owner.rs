//! OwnerLiveness port - 結果を受け取るオーナーの生存確認
//!
//! ローダーの所有者（画面など）が既に破棄されていたら、
//! progress / complete のコールバックを呼ばずに捨てます。

use std::sync::Weak;

/// "Is my owner still alive?"
///
/// The engine only reads the boolean; what "alive" means is up to the caller.
pub trait OwnerLiveness {
    fn is_alive(&self) -> bool;
}

impl<T> OwnerLiveness for Weak<T> {
    fn is_alive(&self) -> bool {
        self.strong_count() > 0
    }
}

impl<F> OwnerLiveness for F
where
    F: Fn() -> bool,
{
    fn is_alive(&self) -> bool {
        self()
    }
}
