//! タスクモジュール
//!
//! キャリア割り込み、各スキャンタスク、Z相入力、生存表示を分離して管理します。

pub mod carrier;
pub mod index;
pub mod led;
pub mod sequence;
pub mod speed;

// タスク関数を再エクスポート
pub use index::index_task;
pub use led::heartbeat_task;
pub use sequence::sequence_scan_task;
pub use speed::speed_scan_task;
