//! Sumire デバッガのコア機能
//!
//! このクレートは、デバッグセッションの中核ロジックを提供します。
//! ブレークポイント集合の管理、実行制御（continue / step-in / step-over /
//! step-out）、メモリ・レジスタの検査をターゲット制御とDWARF解析の上に
//! 組み立てます。

pub mod breakpoints;
pub mod command;
pub mod errors;
pub mod session;
pub mod source;

pub use breakpoints::BreakpointSet;
pub use command::{BreakLocation, Command};
pub use errors::SessionError;
pub use session::{DebugSession, Frame};

// 他のクレートから使用するために再エクスポート
pub use sumire_dwarf::{Location, Symbol};
pub use sumire_target::StopReason;

/// デバッガの結果型
pub type Result<T> = anyhow::Result<T>;
