//! ブレークポイント集合の管理

use crate::{Result, SessionError};
use std::collections::HashMap;
use sumire_target::{Memory, SoftwareBreakpoint};

/// アドレスをキーとするブレークポイント集合
///
/// 挿入と有効化、削除と無効化を常に対で行います。同一アドレスへの重複挿入は
/// 黙って上書きせず、明示的な `replace_and_enable` を使わない限りエラーです
/// （上書きすると前のブレークポイントが保存していた元バイトが失われるため）。
pub struct BreakpointSet {
    breakpoints: HashMap<u64, SoftwareBreakpoint>,
}

impl BreakpointSet {
    /// 空のブレークポイント集合を作成する
    pub fn new() -> Self {
        Self {
            breakpoints: HashMap::new(),
        }
    }

    /// ブレークポイントを追加し、有効化する
    ///
    /// すでに同じアドレスにある場合はDuplicateBreakpointを返し、集合は
    /// 変更しません。
    pub fn insert_and_enable(&mut self, address: u64, memory: &Memory) -> Result<()> {
        if self.breakpoints.contains_key(&address) {
            return Err(SessionError::DuplicateBreakpoint(address).into());
        }

        let mut bp = SoftwareBreakpoint::new(address);
        bp.enable(memory)?;
        self.breakpoints.insert(address, bp);
        Ok(())
    }

    /// 既存のブレークポイントを破棄して入れ替える
    ///
    /// 既存のパッチが有効なら先に無効化して元バイトを復元してから、
    /// 新しいブレークポイントを設定します。
    pub fn replace_and_enable(&mut self, address: u64, memory: &Memory) -> Result<()> {
        if let Some(mut old) = self.breakpoints.remove(&address) {
            if old.is_enabled() {
                old.disable(memory)?;
            }
        }

        self.insert_and_enable(address, memory)
    }

    /// ブレークポイントを無効化して削除する
    pub fn remove_and_disable(&mut self, address: u64, memory: &Memory) -> Result<()> {
        match self.breakpoints.remove(&address) {
            Some(mut bp) => {
                if bp.is_enabled() {
                    bp.disable(memory)?;
                }
                Ok(())
            }
            None => Err(SessionError::BreakpointNotFound(address).into()),
        }
    }

    /// メモリに触れずにエントリだけを破棄する
    ///
    /// プロセスがすでに終了していて元バイトを復元できない場合に使用します。
    pub fn discard(&mut self, address: u64) {
        self.breakpoints.remove(&address);
    }

    /// 指定アドレスにブレークポイントがあるかどうか
    pub fn contains(&self, address: u64) -> bool {
        self.breakpoints.contains_key(&address)
    }

    /// 指定アドレスに有効なブレークポイントがあるかどうか
    pub fn enabled_at(&self, address: u64) -> bool {
        self.breakpoints
            .get(&address)
            .map(|bp| bp.is_enabled())
            .unwrap_or(false)
    }

    /// 指定アドレスのブレークポイントを可変参照で取得する
    pub fn get_mut(&mut self, address: u64) -> Option<&mut SoftwareBreakpoint> {
        self.breakpoints.get_mut(&address)
    }

    /// すべてのブレークポイントのアドレスを取得する（昇順）
    pub fn addresses(&self) -> Vec<u64> {
        let mut addrs: Vec<u64> = self.breakpoints.keys().copied().collect();
        addrs.sort_unstable();
        addrs
    }
}

impl Default for BreakpointSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INT3: u8 = 0xCC;
    const NOP: u8 = 0x90;

    // 自プロセスの/proc/self/mem経由で、ヒープ上のバッファを対象に
    // 実際のパッチ書き込みを検証する
    fn own_memory() -> Memory {
        Memory::new(std::process::id() as i32)
    }

    fn patch_target() -> (Vec<u8>, u64) {
        let buffer = vec![NOP; 8];
        let address = buffer.as_ptr() as u64;
        (buffer, address)
    }

    #[test]
    fn test_insert_rejects_duplicate() {
        let (_buffer, address) = patch_target();
        let memory = own_memory();
        let mut set = BreakpointSet::new();

        set.insert_and_enable(address, &memory).unwrap();
        assert_eq!(memory.read_u8(address).unwrap(), INT3);

        let err = set.insert_and_enable(address, &memory).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SessionError>(),
            Some(SessionError::DuplicateBreakpoint(_))
        ));

        set.remove_and_disable(address, &memory).unwrap();
        assert_eq!(memory.read_u8(address).unwrap(), NOP);
    }

    #[test]
    fn test_replace_preserves_original_byte() {
        let (_buffer, address) = patch_target();
        let memory = own_memory();
        let mut set = BreakpointSet::new();

        set.insert_and_enable(address, &memory).unwrap();
        set.replace_and_enable(address, &memory).unwrap();
        assert_eq!(memory.read_u8(address).unwrap(), INT3);

        // 入れ替えで保存バイトがINT3に化けていれば、ここで復元に失敗する
        set.remove_and_disable(address, &memory).unwrap();
        assert_eq!(memory.read_u8(address).unwrap(), NOP);
    }

    #[test]
    fn test_replace_installs_when_absent() {
        let (_buffer, address) = patch_target();
        let memory = own_memory();
        let mut set = BreakpointSet::new();

        set.replace_and_enable(address, &memory).unwrap();
        assert_eq!(memory.read_u8(address).unwrap(), INT3);
        assert!(set.enabled_at(address));
    }

    #[test]
    fn test_enabled_at_distinguishes_disabled_entry() {
        let (_buffer, address) = patch_target();
        let memory = own_memory();
        let mut set = BreakpointSet::new();

        set.insert_and_enable(address, &memory).unwrap();
        assert!(set.contains(address));
        assert!(set.enabled_at(address));

        set.get_mut(address).unwrap().disable(&memory).unwrap();
        assert!(set.contains(address));
        assert!(!set.enabled_at(address));
    }

    #[test]
    fn test_remove_missing_breakpoint() {
        let memory = own_memory();
        let mut set = BreakpointSet::new();

        let err = set.remove_and_disable(0x1000, &memory).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SessionError>(),
            Some(SessionError::BreakpointNotFound(0x1000))
        ));
    }
}
