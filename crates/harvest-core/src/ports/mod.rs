//! Ports - 抽象化レイヤー
//!
//! 外部との境界（時刻、ID、認証情報、データソース、メトリクス出力）を trait で切る。
//! 実装は `impls` に置き、テストでは差し替える。

pub mod clock;
pub mod credential;
pub mod id_generator;
pub mod metrics_sink;
pub mod source;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::credential::{Credential, CredentialHandle};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::metrics_sink::{MetricsSink, RunMetrics};
pub use self::source::{DataSource, SourceFactory};
