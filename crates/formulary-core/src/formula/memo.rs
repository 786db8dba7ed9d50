use crate::bitmap::SharedBitmap;
use std::{cell::OnceCell, sync::Arc};

///
/// Memo
///
/// Lazily filled per-node values. Identity fields survive re-initialization;
/// cost and result depend on the execution context and are reset with it.
///

#[derive(Clone, Debug, Default)]
pub(crate) struct Memo {
    pub(crate) hash: OnceCell<u64>,
    pub(crate) transactional_ids: OnceCell<Arc<[u64]>>,
    pub(crate) transactional_id_hash: OnceCell<u64>,
    pub(crate) estimated_cost: OnceCell<u64>,
    pub(crate) cost: OnceCell<u64>,
    pub(crate) result: OnceCell<SharedBitmap>,
}

impl Memo {
    pub(crate) fn reset_execution(&mut self) {
        self.estimated_cost.take();
        self.cost.take();
        self.result.take();
    }
}
