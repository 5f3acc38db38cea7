//! デバッグセッション
//!
//! プロセス制御・メモリ・レジスタ・DWARF索引をまとめて所有し、
//! ブレークポイント集合と実行制御の状態機械を実装します。

use crate::breakpoints::BreakpointSet;
use crate::source;
use crate::{Result, SessionError};
use std::collections::HashSet;
use std::path::Path;
use sumire_dwarf::{
    DwarfLoader, FunctionIndex, LineIndex, Location, Symbol, SymbolResolver,
};
use sumire_target::registers::REGISTER_NAMES;
use sumire_target::{Memory, Process, Registers, StopReason};
use tracing::{debug, warn};

/// 返り番地はフレームポインタの1ワード上にある（System V x86-64の呼び出し規約）。
/// 別のABIに移植する場合は `caller_return_address` だけを差し替えます。
const RETURN_ADDRESS_OFFSET: u64 = 8;

/// バックトレースの最大フレーム数
const MAX_BACKTRACE_FRAMES: usize = 64;

/// ソース表示の前後行数
const SOURCE_CONTEXT_LINES: u64 = 2;

/// バックトレースの1フレーム
#[derive(Debug, Clone)]
pub struct Frame {
    pub pc: u64,
    pub function: String,
}

/// デバッグセッション
///
/// デバッグ対象プロセスのアドレス空間とレジスタはこのセッションが独占的に
/// 所有します。制御フローは完全に同期的で、resume / step を発行したら
/// 対応する停止イベントを待ってから次の操作に進みます。
pub struct DebugSession {
    process: Process,
    memory: Memory,
    registers: Registers,
    lines: LineIndex,
    functions: FunctionIndex,
    symbols: SymbolResolver,
    breakpoints: BreakpointSet,
    /// 実行時ロードベース（非PIEなら0）
    load_base: u64,
    exited: bool,
    exit_code: Option<i32>,
}

impl DebugSession {
    /// 実行可能ファイルを起動してセッションを開始する
    ///
    /// 戻ったとき、デバッグ対象は最初の命令で停止しています。
    pub fn launch<P: AsRef<Path>>(program: P, args: &[String]) -> Result<Self> {
        let loader = DwarfLoader::load(&program)?;
        let process = Process::spawn(&program, args)?;
        Self::from_parts(loader, process)
    }

    /// 既存のプロセスにアタッチしてセッションを開始する
    pub fn attach<P: AsRef<Path>>(program: P, pid: i32) -> Result<Self> {
        let loader = DwarfLoader::load(&program)?;
        let process = Process::attach(pid)?;
        Self::from_parts(loader, process)
    }

    fn from_parts(loader: DwarfLoader, process: Process) -> Result<Self> {
        let lines = LineIndex::build(&loader)?;
        let functions = FunctionIndex::build(&loader)?;
        let symbols = SymbolResolver::new(&loader)?;

        let pid = process.pid();
        let memory = Memory::new(pid);
        let registers = Registers::new(pid);

        // PIEの場合、DWARF内のアドレスはファイル相対なので実行時ベースが必要
        let load_base = if loader.is_pie() {
            memory.load_base()?
        } else {
            0
        };
        debug!(pid, "session started (load base 0x{:x})", load_base);

        Ok(Self {
            process,
            memory,
            registers,
            lines,
            functions,
            symbols,
            breakpoints: BreakpointSet::new(),
            load_base,
            exited: false,
            exit_code: None,
        })
    }

    /// デバッグ対象のプロセスIDを取得する
    pub fn pid(&self) -> i32 {
        self.process.pid()
    }

    /// デバッグ対象が終了しているかどうか
    pub fn has_exited(&self) -> bool {
        self.exited
    }

    /// 終了コードを取得する（シグナルで強制終了した場合はNone）
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.exited {
            return Err(SessionError::InferiorExited.into());
        }
        Ok(())
    }

    /// 実行時アドレスをDWARF内のファイル相対アドレスへ変換する
    fn offset_load_address(&self, pc: u64) -> u64 {
        pc - self.load_base
    }

    /// DWARF内のファイル相対アドレスを実行時アドレスへ変換する
    fn offset_dwarf_address(&self, addr: u64) -> u64 {
        addr + self.load_base
    }

    // ---- ブレークポイント設置 ----

    /// 指定アドレスにブレークポイントを設定する
    ///
    /// 操作者が直接入力したアドレスなので、設置前にマッピング内かどうかを
    /// 検証します。同じアドレスへの重複設定はエラーです
    /// （`replace_breakpoint_at_address` を使えば明示的に入れ替えられます）。
    pub fn set_breakpoint_at_address(&mut self, address: u64) -> Result<()> {
        self.ensure_alive()?;

        if !self.memory.is_mapped(address)? {
            return Err(anyhow::anyhow!("Address 0x{:x} is not mapped", address));
        }

        self.breakpoints.insert_and_enable(address, &self.memory)
    }

    /// 指定アドレスのブレークポイントを入れ替える
    pub fn replace_breakpoint_at_address(&mut self, address: u64) -> Result<()> {
        self.ensure_alive()?;
        self.breakpoints.replace_and_enable(address, &self.memory)
    }

    /// 関数名でブレークポイントを設定する
    ///
    /// 関数エントリの行テーブルエントリの*次*のエントリに設置することで、
    /// プロローグをスキップしてユーザコードの先頭行で停止させます。
    /// DWARFに該当する関数がなければELFシンボルテーブルで補完します
    /// （その場合プロローグスキップはできず、関数エントリに設置します）。
    /// 設置した実行時アドレスを返します。
    pub fn set_breakpoint_at_function(&mut self, name: &str) -> Result<u64> {
        self.ensure_alive()?;

        let address = match self.functions.resolve_name(name) {
            Ok(entry) => {
                let location = self.lines.location_for_pc(entry)?;
                let after_prologue = self.lines.next_location(&location)?;
                self.offset_dwarf_address(after_prologue.address)
            }
            Err(e) => match self.symbols.resolve(name) {
                Some(addr) => self.offset_dwarf_address(addr),
                None => return Err(e),
            },
        };

        self.breakpoints.insert_and_enable(address, &self.memory)?;
        Ok(address)
    }

    /// ソース行でブレークポイントを設定する
    ///
    /// `file` はコンパイルユニット名とサフィックス一致で照合します。
    /// 該当する行テーブルエントリがなければSymbolNotFoundを返し、
    /// ブレークポイント集合は変更されません。
    pub fn set_breakpoint_at_source_line(&mut self, file: &str, line: u64) -> Result<u64> {
        self.ensure_alive()?;

        let addr = self.lines.address_for_source_line(file, line)?;
        let address = self.offset_dwarf_address(addr);
        self.breakpoints.insert_and_enable(address, &self.memory)?;
        Ok(address)
    }

    /// ブレークポイントを削除する
    pub fn remove_breakpoint(&mut self, address: u64) -> Result<()> {
        self.ensure_alive()?;
        self.breakpoints.remove_and_disable(address, &self.memory)
    }

    /// 設定済みブレークポイントのアドレス一覧を取得する
    pub fn breakpoint_addresses(&self) -> Vec<u64> {
        self.breakpoints.addresses()
    }

    // ---- 実行制御 ----

    /// 実行を継続し、次の停止イベントを処理して返す
    pub fn continue_execution(&mut self) -> Result<StopReason> {
        self.ensure_alive()?;

        self.step_over_breakpoint()?;
        if self.exited {
            return Ok(StopReason::Exited(self.exit_code.unwrap_or(0)));
        }

        let reason = self.process.resume_and_wait()?;
        self.handle_stop(reason)
    }

    /// 現在のPCにブレークポイントが埋まっていれば、それを跨いで1命令進める
    ///
    /// 無効化→1ステップ→再有効化を厳密にこの順で行います。対象プロセスは
    /// この間ずっと停止しているため、パッチ途中の命令列を観測することは
    /// ありません。resumeの前に必ずこの手順を踏むことで、現在地の
    /// ブレークポイントが前進を妨げないことと、直後に復元されることを
    /// 保証します。
    pub fn step_over_breakpoint(&mut self) -> Result<()> {
        let pc = self.registers.get_pc()?;
        if self.breakpoints.enabled_at(pc) {
            self.step_past_breakpoint(pc)?;
        }
        Ok(())
    }

    fn step_past_breakpoint(&mut self, pc: u64) -> Result<StopReason> {
        if let Some(bp) = self.breakpoints.get_mut(pc) {
            bp.disable(&self.memory)?;
        }

        let reason = self.process.single_step()?;

        match reason {
            StopReason::Exited(code) => {
                self.exited = true;
                self.exit_code = Some(code);
                // 元バイトを書き戻す相手がいないのでエントリだけ破棄する
                self.breakpoints.discard(pc);
            }
            StopReason::Killed(_) => {
                self.exited = true;
                self.breakpoints.discard(pc);
            }
            _ => {
                if let Some(bp) = self.breakpoints.get_mut(pc) {
                    bp.enable(&self.memory)?;
                }
            }
        }

        Ok(reason)
    }

    /// 1命令だけ実行する
    pub fn single_step_instruction(&mut self) -> Result<StopReason> {
        self.ensure_alive()?;
        let reason = self.process.single_step()?;
        self.record_stop(&reason);
        Ok(reason)
    }

    /// 1命令だけ実行する（現在地のブレークポイントを考慮）
    ///
    /// 現在のPCにINT3が埋まっている場合、そのまま1ステップすると
    /// トラップ命令自体を実行してしまうため、step-over-breakpointの手順に
    /// 委譲します。
    pub fn single_step_instruction_with_breakpoint_check(&mut self) -> Result<StopReason> {
        self.ensure_alive()?;

        let pc = self.registers.get_pc()?;
        if self.breakpoints.enabled_at(pc) {
            self.step_past_breakpoint(pc)
        } else {
            self.single_step_instruction()
        }
    }

    /// ソース行単位のステップイン
    ///
    /// 行テーブル上の行番号が変わるまで1命令ずつ実行します。関数呼び出しが
    /// あれば呼び出し先の最初の行で停止します。停止後の位置を返します
    /// （プロセスが終了・シグナル停止した場合はNone）。
    pub fn step_in(&mut self) -> Result<Option<Location>> {
        self.ensure_alive()?;

        let start_line = self.current_location()?.line;

        loop {
            let reason = self.single_step_instruction_with_breakpoint_check()?;
            if self.exited {
                return Ok(None);
            }
            if let StopReason::Signal(signal) = reason {
                warn!(?signal, "step interrupted by signal");
                return Ok(None);
            }

            let location = self.current_location()?;
            if location.line != start_line {
                self.show_source(&location);
                return Ok(Some(location));
            }
        }
    }

    /// 現在の関数から抜けるまで実行する（ステップアウト）
    ///
    /// 呼び出し元の返り番地に一時ブレークポイントを張って1回だけcontinue
    /// します。既存のユーザブレークポイントがそこにある場合は張らず、
    /// 削除もしません。
    pub fn step_out(&mut self) -> Result<StopReason> {
        self.ensure_alive()?;

        let return_address = self.caller_return_address()?;

        let added = if self.breakpoints.enabled_at(return_address) {
            false
        } else {
            self.breakpoints
                .insert_and_enable(return_address, &self.memory)?;
            true
        };

        let result = self.continue_execution();

        if added {
            self.cleanup_temporaries(&[return_address]);
        }

        result
    }

    /// 次のソース行まで実行する（ステップオーバー）
    ///
    /// 呼び出し先を1命令ずつ辿るのは遅すぎるため、現在の関数本体の
    /// すべての行テーブルエントリと呼び出し元の返り番地に一時
    /// ブレークポイントを張り、1回だけcontinueします。どの分岐を通っても
    /// 次の同期的な停止は現在の関数内の別の行か、関数からの復帰地点に
    /// なります。終了後、この呼び出しで追加した一時ブレークポイントだけを
    /// すべて取り除きます。
    pub fn step_over(&mut self) -> Result<StopReason> {
        self.ensure_alive()?;

        let pc = self.registers.get_pc()?;
        let offset_pc = self.offset_load_address(pc);

        let func = self.functions.function_containing(offset_pc)?.clone();
        let start_line = self.lines.location_for_pc(offset_pc)?;

        let line_addresses: Vec<u64> = self
            .lines
            .addresses_in_range(func.low_pc, func.high_pc)
            .into_iter()
            .map(|(addr, _)| self.offset_dwarf_address(addr))
            .collect();
        let start_address = self.offset_dwarf_address(start_line.address);
        let return_address = self.caller_return_address()?;

        let planted: HashSet<u64> = self.breakpoints.addresses().into_iter().collect();
        let plan = plan_step_over(&line_addresses, start_address, return_address, &planted);
        debug!(function = %func.name, count = plan.len(), "planting step-over breakpoints");

        let mut temporaries = Vec::new();
        for &addr in &plan {
            if let Err(e) = self.breakpoints.insert_and_enable(addr, &self.memory) {
                self.cleanup_temporaries(&temporaries);
                return Err(e);
            }
            temporaries.push(addr);
        }

        let result = self.continue_execution();
        self.cleanup_temporaries(&temporaries);
        result
    }

    /// 一時ブレークポイントを取り除く
    ///
    /// 途中で失敗しても残りの削除は続行します。
    fn cleanup_temporaries(&mut self, addresses: &[u64]) {
        for &addr in addresses {
            if self.exited {
                self.breakpoints.discard(addr);
            } else if let Err(e) = self.breakpoints.remove_and_disable(addr, &self.memory) {
                warn!("failed to remove temporary breakpoint at 0x{:x}: {}", addr, e);
            }
        }
    }

    /// 停止イベントを処理する
    ///
    /// ブレークポイントヒット時はPC巻き戻し済みの位置のソース行を表示します。
    /// シグナル停止は報告するだけでセッションは停止状態のまま検査可能です。
    fn handle_stop(&mut self, reason: StopReason) -> Result<StopReason> {
        self.record_stop(&reason);

        if reason == StopReason::Breakpoint {
            match self.current_location() {
                Ok(location) => self.show_source(&location),
                Err(e) => debug!(error = %e, "no line info at stop location"),
            }
        }

        Ok(reason)
    }

    /// 停止イベントに伴うセッション状態の更新だけを行う
    fn record_stop(&mut self, reason: &StopReason) {
        match reason {
            StopReason::Exited(code) => {
                self.exited = true;
                self.exit_code = Some(*code);
            }
            StopReason::Killed(signal) => {
                warn!(?signal, "inferior was killed");
                self.exited = true;
            }
            StopReason::Signal(signal) => {
                warn!(?signal, "inferior stopped by signal");
            }
            _ => {}
        }
    }

    fn show_source(&self, location: &Location) {
        if let Err(e) = source::print_source(&location.file, location.line, SOURCE_CONTEXT_LINES)
        {
            debug!(file = %location.file, error = %e, "could not print source");
        }
    }

    // ---- 検査 ----

    /// 現在のPCを取得する
    pub fn pc(&self) -> Result<u64> {
        self.ensure_alive()?;
        self.registers.get_pc()
    }

    /// 現在のPCに対応するソース位置を取得する
    pub fn current_location(&self) -> Result<Location> {
        self.ensure_alive()?;
        let pc = self.registers.get_pc()?;
        self.lines.location_for_pc(self.offset_load_address(pc))
    }

    /// メモリから1ワード読み取る
    pub fn read_memory(&self, address: u64) -> Result<u64> {
        self.ensure_alive()?;
        self.memory.read_u64(address)
    }

    /// メモリに1ワード書き込む
    pub fn write_memory(&mut self, address: u64, value: u64) -> Result<()> {
        self.ensure_alive()?;
        self.memory.write_u64(address, value)
    }

    /// 名前でレジスタを読み取る
    pub fn read_register(&self, name: &str) -> Result<u64> {
        self.ensure_alive()?;
        self.registers.read_by_name(name)
    }

    /// 名前でレジスタに書き込む
    pub fn write_register(&mut self, name: &str, value: u64) -> Result<()> {
        self.ensure_alive()?;
        self.registers.write_by_name(name, value)
    }

    /// 全レジスタの (名前, 値) 一覧を取得する
    pub fn dump_registers(&self) -> Result<Vec<(&'static str, u64)>> {
        self.ensure_alive()?;

        let regs = self.registers.read_all()?;
        Ok(REGISTER_NAMES
            .iter()
            .filter_map(|name| {
                sumire_target::registers::register_value(&regs, name).map(|v| (*name, v))
            })
            .collect())
    }

    /// パターンにマッチするELFシンボルを検索する
    pub fn lookup_symbol(&self, pattern: &str) -> Vec<Symbol> {
        self.symbols.find_symbols(pattern)
    }

    /// フレームポインタチェーンを辿ってバックトレースを取得する
    ///
    /// mainに達するか、関数を解決できなくなった時点で打ち切ります。
    pub fn backtrace(&self) -> Result<Vec<Frame>> {
        self.ensure_alive()?;

        let mut frames = Vec::new();

        let pc = self.registers.get_pc()?;
        let mut name = self.resolve_frame_function(pc).ok_or_else(|| {
            anyhow::anyhow!("No function information for pc 0x{:x}", pc)
        })?;
        frames.push(Frame {
            pc,
            function: name.clone(),
        });

        let mut frame_pointer = self.registers.get_frame_pointer()?;

        while name != "main" && frames.len() < MAX_BACKTRACE_FRAMES {
            let return_address = self.memory.read_u64(frame_pointer + RETURN_ADDRESS_OFFSET)?;

            match self.resolve_frame_function(return_address) {
                Some(n) => {
                    name = n;
                    frames.push(Frame {
                        pc: return_address,
                        function: name.clone(),
                    });
                }
                None => break,
            }

            frame_pointer = self.memory.read_u64(frame_pointer)?;
        }

        Ok(frames)
    }

    /// フレームのPCから関数名を解決する
    ///
    /// DWARFの関数索引を優先し、DWARFに含まれないコード（libcなど）は
    /// ELFシンボルテーブルの逆引きで補完します。
    fn resolve_frame_function(&self, pc: u64) -> Option<String> {
        let offset_pc = self.offset_load_address(pc);

        if let Ok(func) = self.functions.function_containing(offset_pc) {
            return Some(func.name.clone());
        }

        self.symbols
            .reverse_resolve(offset_pc)
            .map(|sym| sym.display_name().to_string())
    }

    /// 呼び出し元の返り番地を取得する
    ///
    /// ABI依存の仮定（返り番地がフレームポインタ+8にある）はこの関数に
    /// 閉じ込めています。
    fn caller_return_address(&self) -> Result<u64> {
        let frame_pointer = self.registers.get_frame_pointer()?;
        self.memory.read_u64(frame_pointer + RETURN_ADDRESS_OFFSET)
    }
}

/// step-overで張る一時ブレークポイントのアドレスを計画する
///
/// 関数本体の行エントリのうち、現在行の先頭と既存ブレークポイントを除いた
/// ものに、呼び出し元の返り番地を加えます。重複は除去します。
fn plan_step_over(
    line_addresses: &[u64],
    start_line_address: u64,
    return_address: u64,
    planted: &HashSet<u64>,
) -> Vec<u64> {
    let mut seen = HashSet::new();
    let mut plan = Vec::new();

    for &addr in line_addresses {
        if addr != start_line_address && !planted.contains(&addr) && seen.insert(addr) {
            plan.push(addr);
        }
    }

    if !planted.contains(&return_address) && seen.insert(return_address) {
        plan.push(return_address);
    }

    plan
}
