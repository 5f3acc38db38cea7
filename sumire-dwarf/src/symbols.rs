//! ELFシンボルテーブルの解決機能

use crate::{DwarfLoader, Result};
use object::{Object, ObjectSymbol};
use std::collections::HashMap;

/// シンボル情報
#[derive(Debug, Clone)]
pub struct Symbol {
    /// マングルされたシンボル名
    pub name: String,
    /// デマングルされたシンボル名（可読な形式）
    pub demangled_name: String,
    pub address: u64,
    pub size: u64,
}

impl Symbol {
    /// シンボルを作成し、デマングルされた名前を設定する
    pub fn new(name: String, address: u64, size: u64) -> Self {
        let demangled_name = demangle_symbol(&name);
        Self {
            name,
            demangled_name,
            address,
            size,
        }
    }

    /// 表示用の名前を取得する
    pub fn display_name(&self) -> &str {
        &self.demangled_name
    }
}

/// シンボル名をデマングルする
fn demangle_symbol(name: &str) -> String {
    if let Ok(demangled) = rustc_demangle::try_demangle(name) {
        return format!("{:#}", demangled);
    }

    name.to_string()
}

/// ELFシンボルテーブルによるシンボル解決
pub struct SymbolResolver {
    /// シンボル名 -> シンボル情報のマップ
    symbols_by_name: HashMap<String, Symbol>,
    /// アドレス順のシンボル一覧
    symbols_by_address: Vec<Symbol>,
}

impl SymbolResolver {
    /// ロード済みのELFからシンボル解決を作成する
    pub fn new(loader: &DwarfLoader) -> Result<Self> {
        let mut symbols_by_name = HashMap::new();
        let mut symbols_by_address = Vec::new();

        for symbol in loader.object_file().symbols() {
            if let Ok(name) = symbol.name() {
                if !name.is_empty() {
                    let sym = Symbol::new(name.to_string(), symbol.address(), symbol.size());

                    symbols_by_name.insert(name.to_string(), sym.clone());
                    symbols_by_address.push(sym);
                }
            }
        }

        symbols_by_address.sort_by_key(|s| s.address);

        Ok(Self {
            symbols_by_name,
            symbols_by_address,
        })
    }

    /// シンボル名からアドレスを解決する
    pub fn resolve(&self, symbol: &str) -> Option<u64> {
        self.symbols_by_name.get(symbol).map(|s| s.address)
    }

    /// アドレスからシンボルを解決する（最も近いシンボルを返す）
    pub fn reverse_resolve(&self, addr: u64) -> Option<Symbol> {
        match self
            .symbols_by_address
            .binary_search_by_key(&addr, |s| s.address)
        {
            Ok(idx) => Some(self.symbols_by_address[idx].clone()),
            Err(idx) => {
                if idx > 0 {
                    let sym = &self.symbols_by_address[idx - 1];
                    // サイズ情報があれば範囲内かチェックする
                    if sym.size > 0 && addr >= sym.address + sym.size {
                        None
                    } else {
                        Some(sym.clone())
                    }
                } else {
                    None
                }
            }
        }
    }

    /// パターンにマッチするシンボルを検索する
    ///
    /// マングル名とデマングル名の両方を部分一致で検索します。
    pub fn find_symbols(&self, pattern: &str) -> Vec<Symbol> {
        let mut result: Vec<Symbol> = self
            .symbols_by_name
            .values()
            .filter(|s| s.name.contains(pattern) || s.demangled_name.contains(pattern))
            .cloned()
            .collect();
        result.sort_by_key(|s| s.address);
        result
    }
}
