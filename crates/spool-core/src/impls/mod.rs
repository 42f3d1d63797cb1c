//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **BlockingPoolExecutor**: tokio の blocking pool で実行（本番用）
//! - **InlineExecutor**: 呼び出し元スレッドで即実行（テスト・CLI 用）
//! - **FileFetchRequest**: ローカルファイルを「ダウンロード」する FetchRequest
//!
//! HTTP の FetchRequest はこのクレートには含めません。

pub mod blocking_executor;
pub mod file_fetch;
pub mod inline_executor;

pub use self::blocking_executor::BlockingPoolExecutor;
pub use self::file_fetch::FileFetchRequest;
pub use self::inline_executor::InlineExecutor;
