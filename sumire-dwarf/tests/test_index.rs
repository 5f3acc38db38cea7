//! DWARF索引とシンボル解決のテスト
//!
//! デバッグ情報付きでビルドされるテストバイナリ自身をフィクスチャとして
//! 読み込み、行テーブル索引・関数索引・ELFシンボル解決を検証します。

use sumire_dwarf::{DwarfLoader, FunctionIndex, LineIndex, SymbolResolver};

// 索引から探すためのフィクスチャ関数。テストから呼ばれるためDWARFに
// DW_TAG_subprogramとして必ず現れる
#[inline(never)]
fn fixture_checksum(data: &[u8]) -> u64 {
    data.iter()
        .fold(0u64, |acc, &b| acc.wrapping_mul(31).wrapping_add(b as u64))
}

fn load_self() -> DwarfLoader {
    let path = std::env::current_exe().expect("current_exe");
    DwarfLoader::load(&path).expect("load test binary")
}

#[test]
fn test_function_index_finds_fixture() {
    assert_ne!(fixture_checksum(std::hint::black_box(b"sumire")), 0);

    let loader = load_self();
    let functions = FunctionIndex::build(&loader).expect("build function index");

    let entry = functions
        .resolve_name("fixture_checksum")
        .expect("resolve fixture function");
    let func = functions
        .function_containing(entry)
        .expect("function containing entry");
    assert_eq!(func.name, "fixture_checksum");
    assert!(func.high_pc > func.low_pc);

    assert!(functions.resolve_name("no_such_function_anywhere").is_err());
}

#[test]
fn test_line_index_locates_fixture() {
    assert_ne!(fixture_checksum(std::hint::black_box(b"dwarf")), 0);

    let loader = load_self();
    let functions = FunctionIndex::build(&loader).expect("build function index");
    let lines = LineIndex::build(&loader).expect("build line index");

    let entry = functions
        .resolve_name("fixture_checksum")
        .expect("resolve fixture function");

    let location = lines.location_for_pc(entry).expect("location for entry");
    assert!(
        location.file.contains("test_index"),
        "unexpected file: {}",
        location.file
    );
    assert!(location.line > 0);

    // プロローグスキップに使う次エントリが同じシーケンス内で見つかる
    let next = lines.next_location(&location).expect("next location");
    assert!(next.address >= location.address);
}

#[test]
fn test_symbol_resolver_round_trip() {
    assert_ne!(fixture_checksum(std::hint::black_box(b"elf")), 0);

    let loader = load_self();
    let resolver = SymbolResolver::new(&loader).expect("build symbol resolver");

    let matches = resolver.find_symbols("fixture_checksum");
    assert!(!matches.is_empty(), "fixture symbol not found");
    assert!(matches[0].display_name().contains("fixture_checksum"));

    // 名前からアドレス、アドレスから名前の両方向が一致する
    let sym = &matches[0];
    assert_eq!(resolver.resolve(&sym.name), Some(sym.address));

    let found = resolver
        .reverse_resolve(sym.address)
        .expect("reverse resolve");
    assert_eq!(found.address, sym.address);

    assert_eq!(resolver.resolve("no_such_symbol_anywhere"), None);
}
