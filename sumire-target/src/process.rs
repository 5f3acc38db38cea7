//! プロセス制御機能

use crate::{Registers, Result};
use nix::sys::signal::Signal;
use std::ffi::CString;
use std::path::Path;
use tracing::{debug, warn};

/// SIGTRAPのsi_code: カーネル起因のトラップ（INT3もこれで届くことがある）
const SI_KERNEL: i32 = 0x80;
/// SIGTRAPのsi_code: ブレークポイント命令によるトラップ
const TRAP_BRKPT: i32 = 1;
/// SIGTRAPのsi_code: シングルステップ完了によるトラップ
const TRAP_TRACE: i32 = 2;

/// SIGTRAPの分類結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapKind {
    /// 埋め込んだINT3によるブレークポイントヒット
    Breakpoint,
    /// 命令単位トレースによる停止
    SingleStep,
    /// 分類できないトラップ（si_codeを保持）
    Unknown(i32),
}

/// SIGTRAPのsi_codeを分類する
///
/// プラットフォーム依存の判定をこの純粋関数に閉じ込めています。
/// ブレークポイントのINT3はTRAP_BRKPTまたはSI_KERNELとして届き、
/// PTRACE_SINGLESTEPの完了はTRAP_TRACEとして届きます。
pub fn classify_trap(si_code: i32) -> TrapKind {
    match si_code {
        TRAP_BRKPT | SI_KERNEL => TrapKind::Breakpoint,
        TRAP_TRACE => TrapKind::SingleStep,
        code => TrapKind::Unknown(code),
    }
}

/// 停止イベントの種類
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// ブレークポイントヒット（PCは巻き戻し済み）
    Breakpoint,
    /// ステップ実行完了
    SingleStep,
    /// 分類できないSIGTRAP
    UnknownTrap(i32),
    /// SIGTRAP以外のシグナルで停止
    Signal(Signal),
    /// プロセスが正常終了
    Exited(i32),
    /// プロセスがシグナルで強制終了
    Killed(Signal),
    /// その他の停止
    Other,
}

/// デバッグ対象のプロセス（inferior）
pub struct Process {
    pid: nix::unistd::Pid,
}

impl Process {
    /// 実行可能ファイルを起動してデバッグ対象プロセスを開始する
    ///
    /// forkした子プロセスでPTRACE_TRACEMEを設定してからexecveします。
    /// 戻ったとき、子プロセスは最初の命令で停止しており、メモリマッピングも
    /// 初期化済みなのでブレークポイントを安全に設定できます。
    pub fn spawn<P: AsRef<Path>>(program: P, args: &[String]) -> Result<Self> {
        use nix::sys::ptrace;
        use nix::sys::wait::{waitpid, WaitStatus};
        use nix::unistd::{execve, fork, ForkResult};

        let program_path = program
            .as_ref()
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid program path"))?;
        let program_cstring = CString::new(program_path)?;

        let mut cstring_args = vec![program_cstring.clone()];
        for arg in args {
            cstring_args.push(CString::new(arg.as_str())?);
        }

        // 環境変数は親プロセスから継承
        let env: Vec<CString> = std::env::vars()
            .map(|(key, val)| CString::new(format!("{}={}", key, val)).map_err(anyhow::Error::from))
            .collect::<Result<Vec<_>>>()?;

        match unsafe { fork()? } {
            ForkResult::Parent { child } => {
                // execve直後の停止を待つ
                match waitpid(child, None)? {
                    WaitStatus::Stopped(_, _) => {
                        // メモリマッピングを確定させるために1ステップ進める
                        ptrace::step(child, None)?;

                        match waitpid(child, None)? {
                            WaitStatus::Stopped(_, _) => {
                                debug!(pid = child.as_raw(), "spawned inferior");
                                Ok(Self { pid: child })
                            }
                            status => Err(anyhow::anyhow!(
                                "Unexpected wait status after step: {:?}",
                                status
                            )),
                        }
                    }
                    status => Err(anyhow::anyhow!(
                        "Unexpected wait status after execve: {:?}",
                        status
                    )),
                }
            }
            ForkResult::Child => {
                ptrace::traceme()?;

                // 成功すると戻ってこない
                execve(&program_cstring, &cstring_args, &env)?;

                unreachable!("execve failed");
            }
        }
    }

    /// 既存のプロセスにアタッチする
    pub fn attach(pid: i32) -> Result<Self> {
        let pid = nix::unistd::Pid::from_raw(pid);
        nix::sys::ptrace::attach(pid)?;
        nix::sys::wait::waitpid(pid, None)?;
        Ok(Self { pid })
    }

    /// プロセスIDを取得する
    pub fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    /// プロセスを実行継続して次の停止イベントを待つ
    ///
    /// 現在のPCにブレークポイントが埋まったまま呼んではいけません。
    /// その場合は先に呼び出し側がstep-over-breakpointの手順を踏む必要があります。
    pub fn resume_and_wait(&self) -> Result<StopReason> {
        nix::sys::ptrace::cont(self.pid, None)?;
        self.wait_for_stop()
    }

    /// 1命令だけ実行して停止イベントを待つ
    pub fn single_step(&self) -> Result<StopReason> {
        nix::sys::ptrace::step(self.pid, None)?;
        self.wait_for_stop()
    }

    /// 停止イベントを待って分類する
    ///
    /// SIGTRAPはsiginfoのsi_codeで分類します。ブレークポイントヒットの場合、
    /// トラップはINT3の1バイト先で発生しているため、ここでPCを1バイト
    /// 巻き戻してから返します。呼び出し側がPCを読む時点では常に
    /// ブレークポイントの真のアドレスを指しています。
    pub fn wait_for_stop(&self) -> Result<StopReason> {
        use nix::sys::ptrace;
        use nix::sys::wait::{waitpid, WaitStatus};

        let status = waitpid(self.pid, None)?;

        match status {
            WaitStatus::Stopped(_, Signal::SIGTRAP) => {
                let info = ptrace::getsiginfo(self.pid)?;
                match classify_trap(info.si_code) {
                    TrapKind::Breakpoint => {
                        let registers = Registers::new(self.pid.as_raw());
                        let pc = registers.get_pc()?;
                        registers.set_pc(pc - 1)?;
                        debug!("breakpoint hit at 0x{:x}", pc - 1);
                        Ok(StopReason::Breakpoint)
                    }
                    TrapKind::SingleStep => Ok(StopReason::SingleStep),
                    TrapKind::Unknown(code) => {
                        warn!(si_code = code, "unrecognized SIGTRAP");
                        Ok(StopReason::UnknownTrap(code))
                    }
                }
            }
            WaitStatus::Stopped(_, signal) => Ok(StopReason::Signal(signal)),
            WaitStatus::Exited(_, code) => Ok(StopReason::Exited(code)),
            WaitStatus::Signaled(_, signal, _) => Ok(StopReason::Killed(signal)),
            _ => Ok(StopReason::Other),
        }
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        let _ = nix::sys::ptrace::detach(self.pid, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_trap_breakpoint() {
        assert_eq!(classify_trap(TRAP_BRKPT), TrapKind::Breakpoint);
        assert_eq!(classify_trap(SI_KERNEL), TrapKind::Breakpoint);
    }

    #[test]
    fn test_classify_trap_single_step() {
        assert_eq!(classify_trap(TRAP_TRACE), TrapKind::SingleStep);
    }

    #[test]
    fn test_classify_trap_unknown() {
        assert_eq!(classify_trap(0), TrapKind::Unknown(0));
        assert_eq!(classify_trap(42), TrapKind::Unknown(42));
    }
}
