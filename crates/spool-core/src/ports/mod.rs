//! Ports - 抽象化レイヤー
//!
//! エンジンが外部に依存する境界をここで trait として定義します。
//! 実装の詳細（スレッドプール、ネットワーク、ファイル形式）は隠蔽されます。
//!
//! # 境界
//! - **Executor**: タスク本体を実行する（満杯なら拒否を返す）
//! - **CacheParams / FetchRequest**: キャッシュファイルの場所・ダウンロード・パース
//! - **OwnerLiveness**: 結果を受け取るオーナーがまだ生きているか
//! - **Cancelable**: 長い処理の途中でキャンセルを確認する

pub mod cancel;
pub mod executor;
pub mod fetch;
pub mod owner;

pub use self::cancel::{Cancelable, NeverCancelled};
pub use self::executor::{Executor, ExecutorError, Job};
pub use self::fetch::{CacheParams, FetchRequest, StatusCode};
pub use self::owner::OwnerLiveness;
