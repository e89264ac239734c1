use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// 停止要求を伝えるフラグ
///
/// シグナルハンドラから立てられるよう、中身はアトミックな真偽値のみ。
/// 一度立てたら戻らない
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `signal_hook::flag::register`に渡すためのフラグ
    pub fn flag(&self) -> Arc<AtomicBool> {
        self.0.clone()
    }
}
