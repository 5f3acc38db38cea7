//! メモリアクセス機能

use crate::Result;
use nix::unistd::Pid;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read as _, Seek, SeekFrom, Write as _};

/// メモリマッピング情報
#[derive(Debug, Clone)]
pub struct MemoryMapping {
    pub start: u64,
    pub end: u64,
    pub file_offset: u64,
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
}

/// デバッグ対象プロセスのメモリアクセス
///
/// /proc/pid/mem 経由で読み書きします。読み取りがEIOで失敗した場合は
/// PTRACE_PEEKDATAにフォールバックします。
pub struct Memory {
    pid: Pid,
}

impl Memory {
    /// メモリアクセスを作成する
    pub fn new(pid: i32) -> Self {
        Self {
            pid: Pid::from_raw(pid),
        }
    }

    fn mem_path(&self) -> String {
        format!("/proc/{}/mem", self.pid)
    }

    /// メモリからデータを読み取る
    ///
    /// アドレスが未マッピングの場合はエラーを返します。0として読めたことには
    /// なりません。
    pub fn read(&self, addr: u64, size: usize) -> Result<Vec<u8>> {
        match self.read_via_proc_mem(addr, size) {
            Ok(data) => Ok(data),
            Err(e) => {
                // EIO（未マッピング領域などでカーネルが拒否）のときのみptraceで再試行
                if let Some(io_err) = e.downcast_ref::<std::io::Error>() {
                    if io_err.raw_os_error() == Some(nix::libc::EIO) {
                        return self.read_via_ptrace(addr, size);
                    }
                }
                Err(e)
            }
        }
    }

    fn read_via_proc_mem(&self, addr: u64, size: usize) -> Result<Vec<u8>> {
        let mem_path = self.mem_path();
        let mut file = File::open(&mem_path)
            .map_err(|e| anyhow::anyhow!("Failed to open {}: {}", mem_path, e))?;

        file.seek(SeekFrom::Start(addr))?;

        let mut buffer = vec![0u8; size];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    /// PTRACE_PEEKDATAを使用してメモリを読み取る
    ///
    /// /proc/pid/memが使用できない場合のフォールバック。word単位で読み取ります。
    fn read_via_ptrace(&self, addr: u64, size: usize) -> Result<Vec<u8>> {
        use nix::sys::ptrace;

        let mut data = Vec::with_capacity(size);
        let word_size = std::mem::size_of::<usize>();

        for offset in (0..size).step_by(word_size) {
            let word_addr = (addr as usize + offset) as *mut std::ffi::c_void;
            let word = ptrace::read(self.pid, word_addr).map_err(|e| {
                anyhow::anyhow!(
                    "Failed to read via ptrace at 0x{:x}: {}",
                    addr as usize + offset,
                    e
                )
            })?;

            let bytes = word.to_ne_bytes();
            let remaining = size - offset;
            data.extend_from_slice(&bytes[..remaining.min(word_size)]);
        }

        Ok(data)
    }

    /// メモリにデータを書き込む
    pub fn write(&self, addr: u64, data: &[u8]) -> Result<()> {
        let mem_path = self.mem_path();
        let mut file = OpenOptions::new()
            .write(true)
            .open(&mem_path)
            .map_err(|e| anyhow::anyhow!("Failed to open {} for writing: {}", mem_path, e))?;

        file.seek(SeekFrom::Start(addr))
            .map_err(|e| anyhow::anyhow!("Failed to seek to address 0x{:x}: {}", addr, e))?;

        file.write_all(data).map_err(|e| {
            anyhow::anyhow!("Failed to write {} bytes to 0x{:x}: {}", data.len(), addr, e)
        })?;

        Ok(())
    }

    /// u8値を読み取る
    pub fn read_u8(&self, addr: u64) -> Result<u8> {
        let bytes = self.read(addr, 1)?;
        Ok(bytes[0])
    }

    /// u8値を書き込む
    pub fn write_u8(&self, addr: u64, value: u8) -> Result<()> {
        self.write(addr, &[value])
    }

    /// u64値を読み取る（リトルエンディアン）
    pub fn read_u64(&self, addr: u64) -> Result<u64> {
        let bytes = self.read(addr, 8)?;
        let array: [u8; 8] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("Short read at 0x{:x}", addr))?;
        Ok(u64::from_le_bytes(array))
    }

    /// u64値を書き込む（リトルエンディアン）
    pub fn write_u64(&self, addr: u64, value: u64) -> Result<()> {
        self.write(addr, &value.to_le_bytes())
    }

    /// /proc/pid/maps を解析してメモリマッピング情報を取得する
    pub fn mappings(&self) -> Result<Vec<MemoryMapping>> {
        let maps_path = format!("/proc/{}/maps", self.pid);
        let file = File::open(&maps_path)
            .map_err(|e| anyhow::anyhow!("Failed to open {}: {}", maps_path, e))?;
        let reader = BufReader::new(file);

        let mut mappings = Vec::new();

        for line in reader.lines() {
            let line = line?;
            // フォーマット: "address perms offset dev inode pathname"
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 3 {
                continue;
            }

            let addr_parts: Vec<&str> = parts[0].split('-').collect();
            if addr_parts.len() != 2 {
                continue;
            }

            let start = u64::from_str_radix(addr_parts[0], 16)
                .map_err(|e| anyhow::anyhow!("Failed to parse start address: {}", e))?;
            let end = u64::from_str_radix(addr_parts[1], 16)
                .map_err(|e| anyhow::anyhow!("Failed to parse end address: {}", e))?;
            let file_offset = u64::from_str_radix(parts[2], 16)
                .map_err(|e| anyhow::anyhow!("Failed to parse segment offset: {}", e))?;

            let perms = parts[1];
            mappings.push(MemoryMapping {
                start,
                end,
                file_offset,
                readable: perms.starts_with('r'),
                writable: perms.chars().nth(1) == Some('w'),
                executable: perms.chars().nth(2) == Some('x'),
            });
        }

        Ok(mappings)
    }

    /// 指定されたアドレスが有効なメモリマッピング内にあるかチェックする
    pub fn is_mapped(&self, addr: u64) -> Result<bool> {
        let mappings = self.mappings()?;
        Ok(mappings.iter().any(|m| addr >= m.start && addr < m.end))
    }

    /// 実行可能ファイルのロードベースアドレスを取得する
    ///
    /// PIE実行ファイルはランダムなアドレスにロードされるため、DWARF内の
    /// ファイル相対アドレスと実行時アドレスの変換にこの値が必要になります。
    /// 最初の実行可能セグメントの開始アドレスからファイルオフセットを
    /// 引いた値を返します。
    pub fn load_base(&self) -> Result<u64> {
        let mappings = self.mappings()?;

        mappings
            .iter()
            .find(|m| m.executable)
            .map(|m| m.start - m.file_offset)
            .ok_or_else(|| {
                anyhow::anyhow!("Could not find executable segment in memory mappings")
            })
    }
}
