//! 関数DIEの索引

use crate::loader::{DwarfLoader, Reader};
use crate::{DwarfError, Result};
use tracing::debug;

/// 関数情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionInfo {
    pub name: String,
    /// 関数の開始アドレス（DW_AT_low_pc、ファイル相対）
    pub low_pc: u64,
    /// 関数の終端アドレス（排他的）
    pub high_pc: u64,
}

/// 関数索引
///
/// 全コンパイルユニットのDW_TAG_subprogramを一度だけ走査して実体化します。
/// PCを含む関数の検索と、関数名からエントリアドレスの解決に使用します。
pub struct FunctionIndex {
    functions: Vec<FunctionInfo>,
}

impl FunctionIndex {
    /// DWARFから関数索引を構築する
    ///
    /// アドレス範囲を持たないDIE（インライン化された関数や宣言のみのDIE）は
    /// スキップします。
    pub fn build(loader: &DwarfLoader) -> Result<Self> {
        let dwarf = loader.dwarf();
        let mut functions = Vec::new();

        let mut iter = dwarf.units();
        while let Some(header) = iter.next()? {
            let unit = dwarf.unit(header)?;
            let mut entries = unit.entries();

            while let Some((_, entry)) = entries.next_dfs()? {
                if entry.tag() != gimli::DW_TAG_subprogram {
                    continue;
                }

                let (low_pc, high_pc) = match function_range(entry) {
                    Some(range) => range,
                    None => continue,
                };

                let name = match function_name(dwarf, &unit, entry)? {
                    Some(name) => name,
                    None => continue,
                };

                functions.push(FunctionInfo {
                    name,
                    low_pc,
                    high_pc,
                });
            }
        }

        functions.sort_by_key(|f| f.low_pc);
        debug!(count = functions.len(), "built function index");

        Ok(Self { functions })
    }

    /// PCを含む関数を検索する
    pub fn function_containing(&self, pc: u64) -> Result<&FunctionInfo> {
        let idx = self.functions.partition_point(|f| f.low_pc <= pc);
        if idx > 0 {
            let func = &self.functions[idx - 1];
            if pc < func.high_pc {
                return Ok(func);
            }
        }

        Err(DwarfError::SymbolNotFound(format!("function containing pc 0x{:x}", pc)).into())
    }

    /// 関数名からエントリアドレス（DW_AT_low_pc）を解決する
    pub fn resolve_name(&self, name: &str) -> Result<u64> {
        self.functions
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.low_pc)
            .ok_or_else(|| DwarfError::SymbolNotFound(name.to_string()).into())
    }
}

/// 関数DIEのアドレス範囲を取得する
fn function_range(entry: &gimli::DebuggingInformationEntry<Reader>) -> Option<(u64, u64)> {
    let low_pc = match entry.attr_value(gimli::DW_AT_low_pc).ok()?? {
        gimli::AttributeValue::Addr(addr) => addr,
        _ => return None,
    };

    let high_pc = match entry.attr_value(gimli::DW_AT_high_pc).ok()?? {
        gimli::AttributeValue::Addr(addr) => addr,
        // high_pcはlow_pcからのオフセットとして符号化されることもある
        gimli::AttributeValue::Udata(offset) => low_pc + offset,
        _ => return None,
    };

    Some((low_pc, high_pc))
}

/// 関数DIEの名前を取得する
fn function_name(
    dwarf: &gimli::Dwarf<Reader>,
    unit: &gimli::Unit<Reader>,
    entry: &gimli::DebuggingInformationEntry<Reader>,
) -> Result<Option<String>> {
    let attr = match entry.attr_value(gimli::DW_AT_name)? {
        Some(attr) => attr,
        None => return Ok(None),
    };

    let name = dwarf.attr_string(unit, attr)?;
    Ok(Some(String::from_utf8_lossy(name.slice()).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_index() -> FunctionIndex {
        FunctionIndex {
            functions: vec![
                FunctionInfo {
                    name: "sum".to_string(),
                    low_pc: 0x1000,
                    high_pc: 0x1040,
                },
                FunctionInfo {
                    name: "main".to_string(),
                    low_pc: 0x1040,
                    high_pc: 0x10a0,
                },
            ],
        }
    }

    #[test]
    fn test_function_containing() {
        let index = test_index();

        assert_eq!(index.function_containing(0x1000).unwrap().name, "sum");
        assert_eq!(index.function_containing(0x103f).unwrap().name, "sum");
        assert_eq!(index.function_containing(0x1040).unwrap().name, "main");
        assert!(index.function_containing(0x10a0).is_err());
        assert!(index.function_containing(0x500).is_err());
    }

    #[test]
    fn test_resolve_name() {
        let index = test_index();

        assert_eq!(index.resolve_name("main").unwrap(), 0x1040);
        assert!(index.resolve_name("missing").is_err());
    }
}
