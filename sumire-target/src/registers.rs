//! レジスタアクセス機能

use crate::{Result, TargetError};
use nix::libc::user_regs_struct;
use nix::unistd::Pid;

/// レジスタダンプの表示順（x86-64の汎用レジスタセット）
pub const REGISTER_NAMES: &[&str] = &[
    "rax", "rbx", "rcx", "rdx", "rdi", "rsi", "rbp", "rsp", "r8", "r9", "r10", "r11", "r12",
    "r13", "r14", "r15", "rip", "eflags", "cs", "orig_rax", "fs_base", "gs_base", "fs", "gs",
    "ss", "ds", "es",
];

/// 名前からレジスタ値を取り出す
///
/// 未知の名前の場合はNoneを返します。
pub fn register_value(regs: &user_regs_struct, name: &str) -> Option<u64> {
    let value = match name {
        "rax" => regs.rax,
        "rbx" => regs.rbx,
        "rcx" => regs.rcx,
        "rdx" => regs.rdx,
        "rdi" => regs.rdi,
        "rsi" => regs.rsi,
        "rbp" => regs.rbp,
        "rsp" => regs.rsp,
        "r8" => regs.r8,
        "r9" => regs.r9,
        "r10" => regs.r10,
        "r11" => regs.r11,
        "r12" => regs.r12,
        "r13" => regs.r13,
        "r14" => regs.r14,
        "r15" => regs.r15,
        "rip" => regs.rip,
        "eflags" => regs.eflags,
        "cs" => regs.cs,
        "orig_rax" => regs.orig_rax,
        "fs_base" => regs.fs_base,
        "gs_base" => regs.gs_base,
        "fs" => regs.fs,
        "gs" => regs.gs,
        "ss" => regs.ss,
        "ds" => regs.ds,
        "es" => regs.es,
        _ => return None,
    };
    Some(value)
}

/// 名前で指定されたレジスタに値を設定する
///
/// 未知の名前の場合はfalseを返します。
pub fn set_register_value(regs: &mut user_regs_struct, name: &str, value: u64) -> bool {
    let slot = match name {
        "rax" => &mut regs.rax,
        "rbx" => &mut regs.rbx,
        "rcx" => &mut regs.rcx,
        "rdx" => &mut regs.rdx,
        "rdi" => &mut regs.rdi,
        "rsi" => &mut regs.rsi,
        "rbp" => &mut regs.rbp,
        "rsp" => &mut regs.rsp,
        "r8" => &mut regs.r8,
        "r9" => &mut regs.r9,
        "r10" => &mut regs.r10,
        "r11" => &mut regs.r11,
        "r12" => &mut regs.r12,
        "r13" => &mut regs.r13,
        "r14" => &mut regs.r14,
        "r15" => &mut regs.r15,
        "rip" => &mut regs.rip,
        "eflags" => &mut regs.eflags,
        "cs" => &mut regs.cs,
        "orig_rax" => &mut regs.orig_rax,
        "fs_base" => &mut regs.fs_base,
        "gs_base" => &mut regs.gs_base,
        "fs" => &mut regs.fs,
        "gs" => &mut regs.gs,
        "ss" => &mut regs.ss,
        "ds" => &mut regs.ds,
        "es" => &mut regs.es,
        _ => return false,
    };
    *slot = value;
    true
}

/// 停止中のプロセスへのレジスタアクセス
///
/// レジスタの値はプロセスが停止している間だけ有効です。実行中の読み書きは
/// ptraceがESRCHで失敗し、そのままエラーとして返ります。
pub struct Registers {
    pid: Pid,
}

impl Registers {
    /// レジスタアクセスを作成する
    pub fn new(pid: i32) -> Self {
        Self {
            pid: Pid::from_raw(pid),
        }
    }

    /// レジスタ一式を読み取る
    pub fn read_all(&self) -> Result<user_regs_struct> {
        let regs = nix::sys::ptrace::getregs(self.pid)?;
        Ok(regs)
    }

    /// レジスタ一式を書き込む
    pub fn write_all(&self, regs: user_regs_struct) -> Result<()> {
        nix::sys::ptrace::setregs(self.pid, regs)?;
        Ok(())
    }

    /// 名前でレジスタを読み取る
    pub fn read_by_name(&self, name: &str) -> Result<u64> {
        let regs = self.read_all()?;
        register_value(&regs, name)
            .ok_or_else(|| TargetError::UnknownRegister(name.to_string()).into())
    }

    /// 名前でレジスタに書き込む
    pub fn write_by_name(&self, name: &str, value: u64) -> Result<()> {
        let mut regs = self.read_all()?;
        if !set_register_value(&mut regs, name, value) {
            return Err(TargetError::UnknownRegister(name.to_string()).into());
        }
        self.write_all(regs)
    }

    /// プログラムカウンタ（RIP）を取得する
    pub fn get_pc(&self) -> Result<u64> {
        let regs = self.read_all()?;
        Ok(regs.rip)
    }

    /// プログラムカウンタ（RIP）を設定する
    pub fn set_pc(&self, pc: u64) -> Result<()> {
        let mut regs = self.read_all()?;
        regs.rip = pc;
        self.write_all(regs)
    }

    /// フレームポインタ（RBP）を取得する
    pub fn get_frame_pointer(&self) -> Result<u64> {
        let regs = self.read_all()?;
        Ok(regs.rbp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zeroed_regs() -> user_regs_struct {
        unsafe { std::mem::zeroed() }
    }

    #[test]
    fn test_register_value_known_names() {
        let mut regs = zeroed_regs();
        regs.rax = 0x1234;
        regs.rip = 0xdeadbeef;
        regs.rbp = 0x7fff_0000;

        assert_eq!(register_value(&regs, "rax"), Some(0x1234));
        assert_eq!(register_value(&regs, "rip"), Some(0xdeadbeef));
        assert_eq!(register_value(&regs, "rbp"), Some(0x7fff_0000));
    }

    #[test]
    fn test_register_value_unknown_name() {
        let regs = zeroed_regs();
        assert_eq!(register_value(&regs, "xmm0"), None);
        assert_eq!(register_value(&regs, ""), None);
    }

    #[test]
    fn test_set_register_value_round_trip() {
        let mut regs = zeroed_regs();
        for name in REGISTER_NAMES {
            assert!(set_register_value(&mut regs, name, 0x42), "name: {}", name);
            assert_eq!(register_value(&regs, name), Some(0x42), "name: {}", name);
        }
    }

    #[test]
    fn test_set_register_value_unknown_name() {
        let mut regs = zeroed_regs();
        assert!(!set_register_value(&mut regs, "cr3", 1));
    }
}
