//! harvest-core
//!
//! 不安定なデータ提供元から並列にメトリクスを集め、実行キーごとの JSON ドキュメントへ
//! 追記マージするためのコア。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, run, result, outcome, record, errors）
//! - **ports**: 抽象化レイヤー（Clock, IdGenerator, CredentialHandle, DataSource, MetricsSink）
//! - **app**: アプリケーションロジック（registry, runner, coordinator, aggregator, audit, orchestrator）
//! - **store**: 永続化（ドキュメントのマージ、キー順序、退避、アトミック書き込み）
//! - **impls**: 実装（FileCredential, StaticCredential, CsvMetricsSink）
//! - **config**: TOML 設定

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod store;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
