//! デバッガコマンド
//!
//! 操作はここで一度だけ型付きのコマンドへパースされ、コアが生の文字列を
//! 見ることはありません。エイリアス（c / cont / continue など）もパーサの
//! マッチに畳み込んでいます。

use crate::Result;

/// アドレス・即値のリテラルをu64にパースする
///
/// `0x` / `0X` プレフィックスは16進数、それ以外は10進数として解釈します。
/// プレフィックスなしの16進数は受け付けません（`beef` のような入力を
/// 関数名と数値のどちらにも読めてしまうため）。
fn parse_u64(s: &str) -> Result<u64> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16)
            .map_err(|e| anyhow::anyhow!("Invalid hexadecimal value '{}': {}", s, e));
    }

    s.parse::<u64>()
        .map_err(|e| anyhow::anyhow!("Invalid value '{}' (use 0x for hexadecimal): {}", s, e))
}

/// ブレークポイントの設置先
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakLocation {
    /// 実行時アドレス（0xプレフィックス付き）
    Address(u64),
    /// 関数名
    Function(String),
    /// ソースファイルと行番号（file:line）
    SourceLine(String, u64),
}

impl BreakLocation {
    /// 設置先指定をパースする
    ///
    /// `0x` で始まればアドレス、`:` を含めば file:line、それ以外は関数名と
    /// 解釈します。
    pub fn parse(s: &str) -> Result<Self> {
        if s.starts_with("0x") || s.starts_with("0X") {
            return Ok(BreakLocation::Address(parse_u64(s)?));
        }

        if let Some((file, line)) = s.rsplit_once(':') {
            let line = line
                .parse::<u64>()
                .map_err(|e| anyhow::anyhow!("Invalid line number '{}': {}", line, e))?;
            return Ok(BreakLocation::SourceLine(file.to_string(), line));
        }

        Ok(BreakLocation::Function(s.to_string()))
    }
}

/// デバッガコマンド
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// ブレークポイントを設定
    Break(BreakLocation),
    /// 指定アドレスのブレークポイントを入れ替え
    Replace(u64),
    /// ブレークポイントを削除
    Delete(u64),
    /// ブレークポイント一覧を表示
    ListBreakpoints,
    /// 実行継続
    Continue,
    /// ソース行単位のステップイン
    Step,
    /// 次のソース行へ（ステップオーバー）
    Next,
    /// 現在の関数から抜けるまで実行（ステップアウト）
    Finish,
    /// 1命令だけ実行
    StepInstruction,
    /// 全レジスタ表示
    RegisterDump,
    /// レジスタ読み取り
    RegisterRead(String),
    /// レジスタ書き込み
    RegisterWrite(String, u64),
    /// メモリ読み取り
    MemoryRead(u64),
    /// メモリ書き込み
    MemoryWrite(u64, u64),
    /// シンボル検索
    Symbol(String),
    /// バックトレース表示
    Backtrace,
    /// ヘルプ表示
    Help,
    /// 終了
    Quit,
}

impl Command {
    /// コマンド文字列をパースする
    pub fn parse(input: &str) -> Result<Self> {
        let parts: Vec<&str> = input.trim().split_whitespace().collect();
        if parts.is_empty() {
            return Err(anyhow::anyhow!("Empty command"));
        }

        match parts[0] {
            "break" | "b" => {
                let loc = parts
                    .get(1)
                    .ok_or_else(|| anyhow::anyhow!("Usage: break <0xaddr|function|file:line>"))?;
                Ok(Command::Break(BreakLocation::parse(loc)?))
            }
            "replace" | "rb" => {
                let addr = parts
                    .get(1)
                    .ok_or_else(|| anyhow::anyhow!("Usage: replace <addr>"))?;
                Ok(Command::Replace(parse_u64(addr)?))
            }
            "delete" | "d" => {
                let addr = parts
                    .get(1)
                    .ok_or_else(|| anyhow::anyhow!("Usage: delete <addr>"))?;
                Ok(Command::Delete(parse_u64(addr)?))
            }
            "breakpoints" | "bp" => Ok(Command::ListBreakpoints),
            "continue" | "cont" | "c" => Ok(Command::Continue),
            "step" | "s" => Ok(Command::Step),
            "next" | "n" => Ok(Command::Next),
            "finish" | "f" => Ok(Command::Finish),
            "stepi" | "si" => Ok(Command::StepInstruction),
            "register" | "reg" => Self::parse_register(&parts[1..]),
            "memory" | "mem" => Self::parse_memory(&parts[1..]),
            "symbol" | "sym" => {
                let name = parts
                    .get(1)
                    .ok_or_else(|| anyhow::anyhow!("Usage: symbol <name>"))?;
                Ok(Command::Symbol(name.to_string()))
            }
            "backtrace" | "bt" => Ok(Command::Backtrace),
            "help" | "h" | "?" => Ok(Command::Help),
            "quit" | "q" | "exit" => Ok(Command::Quit),
            other => Err(anyhow::anyhow!("Unknown command: {}", other)),
        }
    }

    fn parse_register(args: &[&str]) -> Result<Self> {
        match args {
            ["dump"] => Ok(Command::RegisterDump),
            ["read", name] => Ok(Command::RegisterRead(name.to_string())),
            ["write", name, value] => Ok(Command::RegisterWrite(
                name.to_string(),
                parse_u64(value)?,
            )),
            _ => Err(anyhow::anyhow!(
                "Usage: register dump | register read <name> | register write <name> <value>"
            )),
        }
    }

    fn parse_memory(args: &[&str]) -> Result<Self> {
        match args {
            ["read", addr] => Ok(Command::MemoryRead(parse_u64(addr)?)),
            ["write", addr, value] => {
                Ok(Command::MemoryWrite(parse_u64(addr)?, parse_u64(value)?))
            }
            _ => Err(anyhow::anyhow!(
                "Usage: memory read <addr> | memory write <addr> <value>"
            )),
        }
    }
}
