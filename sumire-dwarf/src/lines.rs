//! 行テーブル索引
//!
//! 各コンパイルユニットの行プログラムを実体化し、アドレス順に整列した行の
//! 配列として保持します。PCからソース位置への変換、ソース行からアドレスへの
//! 変換、step-over用の範囲走査はすべてこの索引に対して行います。

use crate::loader::{DwarfLoader, Reader};
use crate::{DwarfError, Result};
use std::collections::HashMap;
use std::path::PathBuf;

/// 実体化された行テーブルの1行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineRow {
    pub address: u64,
    pub file_id: usize,
    pub line: u64,
    pub is_stmt: bool,
    /// シーケンス終端マーカー。addressはシーケンスの最終命令の次を指す
    pub end_sequence: bool,
}

/// 1コンパイルユニット分の行テーブル
#[derive(Debug, Clone)]
pub struct UnitLines {
    /// コンパイルユニット名（DW_AT_name）
    pub name: String,
    /// ファイルパステーブル（LineRow::file_idが指す）
    pub files: Vec<String>,
    /// アドレス順に整列した行
    pub rows: Vec<LineRow>,
}

/// ソース位置
///
/// 行テーブル上の位置（unit, row）をカーソルとして保持しており、
/// `LineIndex::next_location` で次のエントリへ進められます。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub file: String,
    pub line: u64,
    pub address: u64,
    unit: usize,
    row: usize,
}

/// 行テーブル索引
pub struct LineIndex {
    units: Vec<UnitLines>,
}

impl LineIndex {
    /// DWARFの全コンパイルユニットから行テーブル索引を構築する
    pub fn build(loader: &DwarfLoader) -> Result<Self> {
        let dwarf = loader.dwarf();
        let mut units = Vec::new();

        let mut iter = dwarf.units();
        while let Some(header) = iter.next()? {
            let unit = dwarf.unit(header)?;

            let name = unit
                .name
                .map(|s| String::from_utf8_lossy(s.slice()).into_owned())
                .unwrap_or_default();

            let program = match unit.line_program.clone() {
                Some(p) => p,
                None => continue,
            };

            let mut files: Vec<String> = Vec::new();
            let mut file_ids: HashMap<u64, usize> = HashMap::new();
            let mut line_rows: Vec<LineRow> = Vec::new();

            let mut rows = program.rows();
            while let Some((row_header, row)) = rows.next_row()? {
                if row.end_sequence() {
                    line_rows.push(LineRow {
                        address: row.address(),
                        file_id: 0,
                        line: 0,
                        is_stmt: false,
                        end_sequence: true,
                    });
                    continue;
                }

                let file_index = row.file_index();
                let file_id = match file_ids.get(&file_index) {
                    Some(id) => *id,
                    None => {
                        let path = resolve_file_path(dwarf, &unit, row_header, file_index);
                        let id = files.len();
                        files.push(path);
                        file_ids.insert(file_index, id);
                        id
                    }
                };

                line_rows.push(LineRow {
                    address: row.address(),
                    file_id,
                    line: row.line().map(|l| l.get()).unwrap_or(0),
                    is_stmt: row.is_stmt(),
                    end_sequence: false,
                });
            }

            // シーケンス終端はその直後に始まるシーケンスの先頭行より前に置く
            line_rows.sort_by_key(|r| (r.address, !r.end_sequence));

            units.push(UnitLines {
                name,
                files,
                rows: line_rows,
            });
        }

        Ok(Self { units })
    }

    /// PCを含む行テーブルエントリを検索する
    ///
    /// どのシーケンスにも含まれない場合はSymbolNotFoundを返します。
    pub fn location_for_pc(&self, pc: u64) -> Result<Location> {
        for (unit_id, unit) in self.units.iter().enumerate() {
            let idx = unit.rows.partition_point(|r| r.address <= pc);
            if idx == 0 {
                continue;
            }

            let row = &unit.rows[idx - 1];
            if row.end_sequence {
                // pcはこのシーケンスの終端以降
                continue;
            }

            return Ok(self.make_location(unit_id, idx - 1));
        }

        Err(DwarfError::SymbolNotFound(format!("line entry for pc 0x{:x}", pc)).into())
    }

    /// 行テーブル上で次のエントリへ進める
    ///
    /// 関数ブレークポイント設置時のプロローグスキップに使用します。
    pub fn next_location(&self, location: &Location) -> Result<Location> {
        let unit = &self.units[location.unit];
        let next = location.row + 1;

        if next >= unit.rows.len() || unit.rows[next].end_sequence {
            return Err(DwarfError::SymbolNotFound(format!(
                "line entry after 0x{:x}",
                location.address
            ))
            .into());
        }

        Ok(self.make_location(location.unit, next))
    }

    /// [lo, hi) に含まれる行エントリの (アドレス, 行番号) を列挙する
    ///
    /// step-overが関数本体の全行に一時ブレークポイントを張るために使用します。
    pub fn addresses_in_range(&self, lo: u64, hi: u64) -> Vec<(u64, u64)> {
        let mut result = Vec::new();

        for unit in &self.units {
            for row in &unit.rows {
                if !row.end_sequence && row.address >= lo && row.address < hi {
                    result.push((row.address, row.line));
                }
            }
        }

        result.sort_unstable();
        result
    }

    /// (ファイル名サフィックス, 行番号) からアドレスを解決する
    ///
    /// コンパイルユニット名がサフィックス一致するユニットを対象に、
    /// is_stmtフラグが立った一致行の最初のエントリを返します。
    pub fn address_for_source_line(&self, file_suffix: &str, line: u64) -> Result<u64> {
        for unit in &self.units {
            if !unit.name.ends_with(file_suffix) {
                continue;
            }

            for row in &unit.rows {
                if !row.end_sequence && row.is_stmt && row.line == line {
                    return Ok(row.address);
                }
            }
        }

        Err(DwarfError::SymbolNotFound(format!("{}:{}", file_suffix, line)).into())
    }

    fn make_location(&self, unit_id: usize, row_id: usize) -> Location {
        let unit = &self.units[unit_id];
        let row = &unit.rows[row_id];
        Location {
            file: unit
                .files
                .get(row.file_id)
                .cloned()
                .unwrap_or_else(|| "<unknown>".to_string()),
            line: row.line,
            address: row.address,
            unit: unit_id,
            row: row_id,
        }
    }
}

/// 行テーブルのファイルエントリをフルパスに解決する
fn resolve_file_path(
    dwarf: &gimli::Dwarf<Reader>,
    unit: &gimli::Unit<Reader>,
    header: &gimli::LineProgramHeader<Reader>,
    file_index: u64,
) -> String {
    let file = match header.file(file_index) {
        Some(f) => f,
        None => return "<unknown>".to_string(),
    };

    let mut path = PathBuf::new();

    // 相対パスはコンパイルディレクトリ起点
    if let Some(comp_dir) = &unit.comp_dir {
        path.push(String::from_utf8_lossy(comp_dir.slice()).as_ref());
    }

    if let Some(dir_attr) = file.directory(header) {
        if let Ok(dir) = dwarf.attr_string(unit, dir_attr) {
            path.push(String::from_utf8_lossy(dir.slice()).as_ref());
        }
    }

    if let Ok(name) = dwarf.attr_string(unit, file.path_name()) {
        path.push(String::from_utf8_lossy(name.slice()).as_ref());
    }

    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(address: u64, line: u64, is_stmt: bool) -> LineRow {
        LineRow {
            address,
            file_id: 0,
            line,
            is_stmt,
            end_sequence: false,
        }
    }

    fn end_row(address: u64) -> LineRow {
        LineRow {
            address,
            file_id: 0,
            line: 0,
            is_stmt: false,
            end_sequence: true,
        }
    }

    fn test_index() -> LineIndex {
        LineIndex {
            units: vec![UnitLines {
                name: "/src/hello.c".to_string(),
                files: vec!["/src/hello.c".to_string()],
                rows: vec![
                    row(0x1000, 3, true),
                    row(0x1008, 4, true),
                    row(0x1010, 4, false),
                    row(0x1018, 6, false),
                    row(0x1020, 5, true),
                    end_row(0x1030),
                    row(0x2000, 10, true),
                    row(0x2010, 11, true),
                    end_row(0x2020),
                ],
            }],
        }
    }

    #[test]
    fn test_location_for_pc_exact_and_interior() {
        let index = test_index();

        let loc = index.location_for_pc(0x1000).unwrap();
        assert_eq!(loc.line, 3);
        assert_eq!(loc.address, 0x1000);

        // エントリの途中のアドレスは直前の行にマッチする
        let loc = index.location_for_pc(0x100c).unwrap();
        assert_eq!(loc.line, 4);
        assert_eq!(loc.address, 0x1008);
    }

    #[test]
    fn test_location_for_pc_outside_sequences() {
        let index = test_index();

        // シーケンスの切れ目
        assert!(index.location_for_pc(0x1800).is_err());
        // 先頭より前
        assert!(index.location_for_pc(0x800).is_err());
        // 最終シーケンスの終端以降
        assert!(index.location_for_pc(0x3000).is_err());
    }

    #[test]
    fn test_location_for_pc_sequence_boundary() {
        let index = test_index();

        // シーケンス先頭アドレスちょうどの検索
        let loc = index.location_for_pc(0x2000).unwrap();
        assert_eq!(loc.line, 10);

        // 前シーケンスの終端マーカーと次シーケンスの先頭が同じアドレスに
        // 同居する場合も先頭行が勝つ
        let mut adjacent = test_index();
        adjacent.units[0].rows[5] = end_row(0x2000);
        let loc = adjacent.location_for_pc(0x2000).unwrap();
        assert_eq!(loc.line, 10);
    }

    #[test]
    fn test_next_location_advances() {
        let index = test_index();

        let loc = index.location_for_pc(0x1000).unwrap();
        let next = index.next_location(&loc).unwrap();
        assert_eq!(next.address, 0x1008);
        assert_eq!(next.line, 4);
    }

    #[test]
    fn test_next_location_at_sequence_end() {
        let index = test_index();

        let loc = index.location_for_pc(0x1020).unwrap();
        assert!(index.next_location(&loc).is_err());
    }

    #[test]
    fn test_addresses_in_range() {
        let index = test_index();

        let addrs = index.addresses_in_range(0x1000, 0x1030);
        assert_eq!(
            addrs,
            vec![(0x1000, 3), (0x1008, 4), (0x1010, 4), (0x1018, 6), (0x1020, 5)]
        );

        // 終端マーカーは含まれない
        let addrs = index.addresses_in_range(0x1020, 0x2010);
        assert_eq!(addrs, vec![(0x1020, 5), (0x2000, 10)]);
    }

    #[test]
    fn test_address_for_source_line() {
        let index = test_index();

        assert_eq!(index.address_for_source_line("hello.c", 4).unwrap(), 0x1008);
        // 行テーブルに存在しない行番号
        assert!(index.address_for_source_line("hello.c", 7).is_err());
        // is_stmtが立っていないエントリしかない行番号も対象外
        assert!(index.address_for_source_line("hello.c", 6).is_err());
        // ファイル名が一致しない
        assert!(index.address_for_source_line("world.c", 4).is_err());
    }
}
