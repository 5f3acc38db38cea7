//! デバッグセッションの実プロセステスト
//!
//! /bin/true を起動し、step-over-breakpointの手順と終了処理を検証します。

use sumire_core::{DebugSession, SessionError, StopReason};

fn low_byte(word: u64) -> u8 {
    (word & 0xff) as u8
}

#[test]
fn test_step_past_breakpoint_advances_pc() {
    let mut session = DebugSession::launch("/bin/true", &[]).expect("launch /bin/true");

    let pc = session.pc().expect("read pc");
    session.set_breakpoint_at_address(pc).expect("set breakpoint");
    assert_eq!(low_byte(session.read_memory(pc).unwrap()), 0xCC);

    // 現在地のINT3を跨いで1命令進み、ブレークポイントは復元される
    session
        .single_step_instruction_with_breakpoint_check()
        .expect("step past breakpoint");
    assert_ne!(session.pc().unwrap(), pc);
    assert_eq!(low_byte(session.read_memory(pc).unwrap()), 0xCC);

    session.remove_breakpoint(pc).expect("remove breakpoint");

    let reason = session.continue_execution().expect("continue to exit");
    assert_eq!(reason, StopReason::Exited(0));
    assert!(session.has_exited());
    assert_eq!(session.exit_code(), Some(0));
}

#[test]
fn test_control_after_exit_is_rejected() {
    let mut session = DebugSession::launch("/bin/true", &[]).expect("launch /bin/true");

    let reason = session.continue_execution().expect("continue to exit");
    assert_eq!(reason, StopReason::Exited(0));

    let err = session.continue_execution().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SessionError>(),
        Some(SessionError::InferiorExited)
    ));
}

#[test]
fn test_breakpoint_outside_mappings_is_rejected() {
    let mut session = DebugSession::launch("/bin/true", &[]).expect("launch /bin/true");

    // NULLページには設置できず、集合も変更されない
    assert!(session.set_breakpoint_at_address(0x10).is_err());
    assert!(session.breakpoint_addresses().is_empty());
}
