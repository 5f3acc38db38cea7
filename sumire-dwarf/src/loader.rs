//! ELFとDWARFの読み込み機能

use crate::Result;
use object::{Object, ObjectSection};
use std::fs;
use std::path::Path;
use std::rc::Rc;

/// このクレートで使用するgimliのReader型
pub type Reader = gimli::EndianSlice<'static, gimli::RunTimeEndian>;

/// DWARFローダー
pub struct DwarfLoader {
    /// オブジェクトファイル
    object_file: Rc<object::File<'static>>,
    /// DWARFコンテキスト
    dwarf: gimli::Dwarf<Reader>,
}

impl DwarfLoader {
    /// ELFファイルからDWARF情報を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file_data = fs::read(path)
            .map_err(|e| anyhow::anyhow!("Failed to read file {:?}: {}", path, e))?;

        // デバッガの生存期間中は解放しないため、Box::leakで'staticライフタイムを得る
        let file_data: &'static [u8] = Box::leak(file_data.into_boxed_slice());

        let object_file = object::File::parse(file_data)
            .map_err(|e| anyhow::anyhow!("Failed to parse ELF file {:?}: {}", path, e))?;

        let endian = if object_file.is_little_endian() {
            gimli::RunTimeEndian::Little
        } else {
            gimli::RunTimeEndian::Big
        };

        let load_section = |id: gimli::SectionId| -> Result<Reader> {
            let data = object_file
                .section_by_name(id.name())
                .and_then(|section| section.data().ok())
                .unwrap_or(&[]);
            Ok(gimli::EndianSlice::new(data, endian))
        };

        let dwarf = gimli::Dwarf::load(load_section)
            .map_err(|e| anyhow::anyhow!("Failed to load DWARF sections: {}", e))?;

        Ok(Self {
            object_file: Rc::new(object_file),
            dwarf,
        })
    }

    /// DWARFコンテキストへの参照を取得
    pub fn dwarf(&self) -> &gimli::Dwarf<Reader> {
        &self.dwarf
    }

    /// オブジェクトファイルへの参照を取得
    pub fn object_file(&self) -> &object::File<'static> {
        &self.object_file
    }

    /// PIE（Position Independent Executable）かどうかを判定する
    ///
    /// PIEの場合、DWARF内のアドレスはファイル相対オフセットであり、
    /// 実行時ロードベースを加算する必要があります。
    pub fn is_pie(&self) -> bool {
        use object::ObjectKind;

        // ET_DYN = PIE実行ファイルまたは共有ライブラリ
        matches!(self.object_file.kind(), ObjectKind::Dynamic)
    }
}
