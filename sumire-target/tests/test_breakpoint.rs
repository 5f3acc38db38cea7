//! ブレークポイントとメモリアクセスのテスト
//!
//! 自プロセスの/proc/self/memと、ptraceで起動した子プロセスの両方を対象に、
//! 実際のメモリ読み書きとパッチ埋め込みを検証します。

use sumire_target::{Memory, Process, Registers, SoftwareBreakpoint, StopReason};

const INT3: u8 = 0xCC;

fn own_memory() -> Memory {
    Memory::new(std::process::id() as i32)
}

#[test]
fn test_breakpoint_byte_round_trip() {
    let buffer = vec![0x90u8; 8];
    let address = buffer.as_ptr() as u64;
    let memory = own_memory();

    let mut bp = SoftwareBreakpoint::new(address);
    assert!(!bp.is_enabled());

    bp.enable(&memory).expect("enable breakpoint");
    assert!(bp.is_enabled());
    assert_eq!(bp.saved_byte(), 0x90);
    assert_eq!(memory.read_u8(address).unwrap(), INT3);

    bp.disable(&memory).expect("disable breakpoint");
    assert!(!bp.is_enabled());
    assert_eq!(memory.read_u8(address).unwrap(), 0x90);
}

#[test]
fn test_double_enable_is_rejected() {
    let buffer = vec![0x90u8; 8];
    let address = buffer.as_ptr() as u64;
    let memory = own_memory();

    let mut bp = SoftwareBreakpoint::new(address);
    bp.enable(&memory).unwrap();

    // 二重有効化を許すと保存バイトがINT3で上書きされてしまう
    assert!(bp.enable(&memory).is_err());
    assert_eq!(bp.saved_byte(), 0x90);

    bp.disable(&memory).unwrap();
    assert_eq!(memory.read_u8(address).unwrap(), 0x90);
    assert!(bp.disable(&memory).is_err());
}

#[test]
fn test_memory_word_round_trip() {
    let buffer = vec![0u8; 16];
    let address = buffer.as_ptr() as u64;
    let memory = own_memory();

    memory.write_u64(address, 0x1122334455667788).unwrap();
    assert_eq!(memory.read_u64(address).unwrap(), 0x1122334455667788);

    // リトルエンディアンで格納されている
    assert_eq!(memory.read_u8(address).unwrap(), 0x88);

    // ワード境界に揃わないサイズでも要求どおりの長さを返す
    let bytes = memory.read(address, 5).unwrap();
    assert_eq!(bytes, vec![0x88, 0x77, 0x66, 0x55, 0x44]);
}

#[test]
fn test_is_mapped() {
    let buffer = vec![0u8; 8];
    let address = buffer.as_ptr() as u64;
    let memory = own_memory();

    assert!(memory.is_mapped(address).unwrap());
    // NULLページは常に未マッピング
    assert!(!memory.is_mapped(0x10).unwrap());
}

#[test]
fn test_spawn_patch_and_single_step() {
    let process = Process::spawn("/bin/true", &[]).expect("spawn /bin/true");
    let memory = Memory::new(process.pid());
    let registers = Registers::new(process.pid());

    let pc = registers.get_pc().expect("read pc");
    let original = memory.read_u8(pc).expect("read text byte");

    // トレーサは読み取り専用のテキストページにも書き込める
    let mut bp = SoftwareBreakpoint::new(pc);
    bp.enable(&memory).expect("enable at pc");
    assert_eq!(memory.read_u8(pc).unwrap(), INT3);
    assert_eq!(bp.saved_byte(), original);

    bp.disable(&memory).expect("disable at pc");
    assert_eq!(memory.read_u8(pc).unwrap(), original);

    let reason = process.single_step().expect("single step");
    assert_eq!(reason, StopReason::SingleStep);
    assert_ne!(registers.get_pc().unwrap(), pc);
}
