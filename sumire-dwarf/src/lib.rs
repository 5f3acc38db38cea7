//! Sumire DWARFデバッグ情報解析
//!
//! このクレートは、ELFファイルとDWARFデバッグ情報の解析機能を提供します。
//! アドレスとソース行の相互変換、関数の範囲解決、シンボル名の解決を行います。

pub mod functions;
pub mod lines;
pub mod loader;
pub mod symbols;

pub use functions::{FunctionIndex, FunctionInfo};
pub use lines::{LineIndex, Location};
pub use loader::DwarfLoader;
pub use symbols::{Symbol, SymbolResolver};

/// DWARF解析のエラー種別
#[derive(Debug, thiserror::Error)]
pub enum DwarfError {
    /// 該当するシンボル・行テーブルエントリが見つからない
    #[error("symbol not found: {0}")]
    SymbolNotFound(String),
}

/// DWARF解析の結果型
pub type Result<T> = anyhow::Result<T>;
