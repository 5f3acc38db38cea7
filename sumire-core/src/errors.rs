//! セッションのエラー種別

/// デバッグセッションのエラー種別
///
/// anyhow経由で伝播させますが、ダウンキャストで種別を判定できます。
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// 同じアドレスにすでにブレークポイントがある
    #[error("breakpoint already exists at 0x{0:x}")]
    DuplicateBreakpoint(u64),

    /// 指定アドレスにブレークポイントがない
    #[error("no breakpoint at 0x{0:x}")]
    BreakpointNotFound(u64),

    /// デバッグ対象プロセスはすでに終了している
    #[error("inferior has exited")]
    InferiorExited,
}
