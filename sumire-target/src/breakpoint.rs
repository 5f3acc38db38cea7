//! ソフトウェアブレークポイント機能

use crate::{Memory, Result};

/// INT3命令のオペコード
const INT3_OPCODE: u8 = 0xCC;

/// ソフトウェアブレークポイント（INT3命令）
///
/// 対象アドレスの先頭1バイトをINT3で置き換え、解除時に元のバイトを復元します。
/// 保存された元バイトは `enabled` の間だけ有効です。二重に有効化すると
/// 元バイトがトラップオペコードで上書きされてしまうため、エラーとします。
pub struct SoftwareBreakpoint {
    address: u64,
    saved_byte: u8,
    enabled: bool,
}

impl SoftwareBreakpoint {
    /// ブレークポイントを作成する（まだメモリには書き込まない）
    pub fn new(address: u64) -> Self {
        Self {
            address,
            saved_byte: 0,
            enabled: false,
        }
    }

    /// ブレークポイントのアドレスを取得する
    pub fn address(&self) -> u64 {
        self.address
    }

    /// ブレークポイントが有効かどうか
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// 保存されている元のバイトを取得する
    pub fn saved_byte(&self) -> u8 {
        self.saved_byte
    }

    /// ブレークポイントを有効化する
    ///
    /// 対象アドレスの元のバイトを保存してから、INT3命令で置き換えます。
    /// メモリアクセスの失敗はそのままエラーとして返します。
    pub fn enable(&mut self, memory: &Memory) -> Result<()> {
        if self.enabled {
            return Err(anyhow::anyhow!(
                "Breakpoint at 0x{:x} is already enabled",
                self.address
            ));
        }

        self.saved_byte = memory.read_u8(self.address)?;
        memory.write_u8(self.address, INT3_OPCODE)?;

        self.enabled = true;
        Ok(())
    }

    /// ブレークポイントを無効化する
    ///
    /// INT3命令を保存しておいた元のバイトで置き換えます。
    pub fn disable(&mut self, memory: &Memory) -> Result<()> {
        if !self.enabled {
            return Err(anyhow::anyhow!(
                "Breakpoint at 0x{:x} is not enabled",
                self.address
            ));
        }

        memory.write_u8(self.address, self.saved_byte)?;

        self.enabled = false;
        Ok(())
    }
}
