//! Sumire CLI - コマンドラインインターフェース
//!
//! ミニマルなネイティブプロセスデバッガ sumire のREPLインターフェース

use anyhow::Result;
use clap::{Parser, Subcommand};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use sumire_core::{BreakLocation, Command, DebugSession, StopReason};

/// Sumire - Minimal Native Debugger
#[derive(Parser)]
#[command(name = "sumire")]
#[command(version = "0.1.0")]
#[command(about = "Source-level debugger for Linux x86-64", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: DebugCommand,
}

#[derive(Subcommand)]
enum DebugCommand {
    /// Launch and debug an executable
    Run {
        /// Path to the executable binary
        binary: String,

        /// Arguments to pass to the program
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Attach to an existing process
    Attach {
        /// Path to the executable binary
        binary: String,

        /// Process ID to attach to
        #[arg(short, long)]
        pid: i32,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut session = init_session(cli.command)?;
    run_repl(&mut session)?;

    Ok(())
}

/// セッションを初期化してプロセスを起動またはアタッチする
fn init_session(command: DebugCommand) -> Result<DebugSession> {
    match command {
        DebugCommand::Run { binary, args } => {
            let session = DebugSession::launch(&binary, &args)?;
            println!("Started {} (pid {})", binary, session.pid());
            println!("Stopped at first instruction. Set breakpoints and 'continue'.");
            println!();
            Ok(session)
        }
        DebugCommand::Attach { binary, pid } => {
            let session = DebugSession::attach(&binary, pid)?;
            println!("Attached to process {}", pid);
            println!();
            Ok(session)
        }
    }
}

/// REPLループを実行する
fn run_repl(session: &mut DebugSession) -> Result<()> {
    println!("Type 'help' for available commands, 'quit' to exit.");
    println!();

    let mut rl = DefaultEditor::new()?;

    loop {
        let readline = rl.readline("(sumire) ");
        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                rl.add_history_entry(line)?;

                match Command::parse(line) {
                    Ok(Command::Quit) => {
                        println!("Goodbye!");
                        break;
                    }
                    Ok(command) => {
                        if let Err(e) = handle_command(session, command) {
                            eprintln!("Error: {}", e);
                        }
                    }
                    Err(e) => eprintln!("Error: {}", e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    Ok(())
}

fn handle_command(session: &mut DebugSession, command: Command) -> Result<()> {
    match command {
        Command::Break(location) => handle_break(session, location)?,
        Command::Replace(address) => {
            session.replace_breakpoint_at_address(address)?;
            println!("Replaced breakpoint at 0x{:x}", address);
        }
        Command::Delete(address) => {
            session.remove_breakpoint(address)?;
            println!("Deleted breakpoint at 0x{:x}", address);
        }
        Command::ListBreakpoints => {
            let addresses = session.breakpoint_addresses();
            if addresses.is_empty() {
                println!("No breakpoints set");
            } else {
                for addr in addresses {
                    println!("  breakpoint at 0x{:x}", addr);
                }
            }
        }
        Command::Continue => {
            let reason = session.continue_execution()?;
            report_stop(session, &reason);
        }
        Command::Step => {
            if let Some(location) = session.step_in()? {
                println!("Stopped at {}:{}", location.file, location.line);
            } else {
                report_exit(session);
            }
        }
        Command::Next => {
            let reason = session.step_over()?;
            report_stop(session, &reason);
        }
        Command::Finish => {
            let reason = session.step_out()?;
            report_stop(session, &reason);
        }
        Command::StepInstruction => {
            session.single_step_instruction_with_breakpoint_check()?;
            if session.has_exited() {
                report_exit(session);
            } else {
                println!("Stopped at 0x{:x}", session.pc()?);
            }
        }
        Command::RegisterDump => {
            for (name, value) in session.dump_registers()? {
                println!("{:<10} 0x{:016x}", name, value);
            }
        }
        Command::RegisterRead(name) => {
            println!("0x{:x}", session.read_register(&name)?);
        }
        Command::RegisterWrite(name, value) => {
            session.write_register(&name, value)?;
        }
        Command::MemoryRead(address) => {
            println!("0x{:016x}", session.read_memory(address)?);
        }
        Command::MemoryWrite(address, value) => {
            session.write_memory(address, value)?;
        }
        Command::Symbol(name) => {
            let symbols = session.lookup_symbol(&name);
            if symbols.is_empty() {
                println!("No symbols matching '{}'", name);
            } else {
                for sym in symbols {
                    println!("  {} @ 0x{:x}", sym.display_name(), sym.address);
                }
            }
        }
        Command::Backtrace => {
            for (i, frame) in session.backtrace()?.iter().enumerate() {
                println!("frame #{}: 0x{:x} {}", i, frame.pc, frame.function);
            }
        }
        Command::Help => print_help(),
        Command::Quit => unreachable!("handled by the REPL loop"),
    }

    Ok(())
}

/// Breakコマンドを処理する
fn handle_break(session: &mut DebugSession, location: BreakLocation) -> Result<()> {
    let address = match location {
        BreakLocation::Address(addr) => {
            session.set_breakpoint_at_address(addr)?;
            addr
        }
        BreakLocation::Function(name) => session.set_breakpoint_at_function(&name)?,
        BreakLocation::SourceLine(file, line) => {
            session.set_breakpoint_at_source_line(&file, line)?
        }
    };

    println!("Set breakpoint at address 0x{:x}", address);
    Ok(())
}

/// 停止理由を表示する
fn report_stop(session: &DebugSession, reason: &StopReason) {
    match reason {
        StopReason::Breakpoint => {
            // ソース行はセッション側が表示済み
            if let Ok(pc) = session.pc() {
                println!("Hit breakpoint at 0x{:x}", pc);
            }
        }
        StopReason::SingleStep => {}
        StopReason::UnknownTrap(code) => {
            println!("Stopped by unrecognized trap (si_code {})", code);
        }
        StopReason::Signal(signal) => {
            println!("Inferior stopped by signal {:?} (still inspectable)", signal);
        }
        StopReason::Killed(signal) => {
            println!("Inferior killed by signal {:?}", signal);
        }
        StopReason::Exited(_) => report_exit(session),
        StopReason::Other => {
            println!("Inferior stopped (unknown reason)");
        }
    }
}

fn report_exit(session: &DebugSession) {
    match session.exit_code() {
        Some(code) => println!("Inferior exited with code {}", code),
        None => println!("Inferior terminated"),
    }
}

fn print_help() {
    println!("Available commands:");
    println!();
    println!("  break <loc> (b)       - Set breakpoint at 0xaddr, function or file:line");
    println!("  replace <addr> (rb)   - Re-install the breakpoint at an address");
    println!("  delete <addr> (d)     - Delete breakpoint");
    println!("  breakpoints (bp)      - List breakpoints");
    println!("  continue (c)          - Continue execution");
    println!("  step (s)              - Step into (source line)");
    println!("  next (n)              - Step over (source line)");
    println!("  finish (f)            - Step out of current function");
    println!("  stepi (si)            - Step one instruction");
    println!("  register dump         - Show all registers");
    println!("  register read <r>     - Read register");
    println!("  register write <r> <v> - Write register");
    println!("  memory read <addr>    - Read one word");
    println!("  memory write <addr> <v> - Write one word");
    println!("  symbol <name> (sym)   - Look up ELF symbols");
    println!("  backtrace (bt)        - Show call stack");
    println!("  help                  - Show this help message");
    println!("  quit                  - Exit the debugger");
    println!();
    println!("Examples:");
    println!("  break main");
    println!("  break hello.c:12");
    println!("  break 0x401130");
    println!("  memory write 0x7ffd1234 0x42");
}
