//! Sumire ターゲットプロセス制御
//!
//! このクレートは、デバッグ対象プロセス（inferior）を制御するための低レベル機能を提供します。
//! ptraceによる実行制御、レジスタアクセス、メモリアクセス、INT3ブレークポイントの
//! 埋め込みと復元を行います。

pub mod breakpoint;
pub mod memory;
pub mod process;
pub mod registers;

pub use breakpoint::SoftwareBreakpoint;
pub use memory::Memory;
pub use process::{Process, StopReason, TrapKind};
pub use registers::Registers;

/// ターゲット制御のエラー種別
#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    /// 未知のレジスタ名が指定された
    #[error("unknown register: {0}")]
    UnknownRegister(String),
}

/// ターゲット制御の結果型
pub type Result<T> = anyhow::Result<T>;
