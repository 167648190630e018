//! Human-readable names for a subset of instrumentation sites
//!
//! The table is maintained by hand and deliberately covers only the
//! branch-like opcodes; every other index renders as "unknown op".

use std::collections::HashMap;

use crate::lang::Op;

lazy_static::lazy_static! {
    static ref OP_LABELS: HashMap<usize, &'static str> = {
        let mut m = HashMap::new();
        m.insert(Op::Call.index(), "OpCall");
        m.insert(Op::Defer.index(), "OpDefer");
        m.insert(Op::Panic1.index(), "OpPanic1");
        m.insert(Op::Panic2.index(), "OpPanic2");
        m.insert(Op::SwitchClause.index(), "OpSwitchClause");
        m.insert(Op::SwitchClauseCase.index(), "OpSwitchClauseCase");
        m.insert(Op::IfCond.index(), "OpIfCond");
        m.insert(Op::ForLoop.index(), "OpForLoop");
        m.insert(Op::RangeIterList.index(), "OpRangeIterList");
        m.insert(Op::RangeIterString.index(), "OpRangeIterString");
        m.insert(Op::RangeIterMap.index(), "OpRangeIterMap");
        m
    };
}

/// Label for a bitmap index, if it has one
pub fn op_label(index: usize) -> Option<&'static str> {
    OP_LABELS.get(&index).copied()
}
