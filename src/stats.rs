use cli_table::{format::Justify, print_stdout, Cell, Style, Table};
use tracing::warn;

use crate::buf_pool::BufPool;

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxStats {
    pub bursts: u64,
    /// Buffers handed to tx_burst
    pub submitted: u64,
    pub accepted: u64,
    /// Freed after the device turned them down
    pub rejected: u64,
    /// Buffers a batch came up short because the pool was empty
    pub alloc_shortfall: u64,
    pub tailroom_drops: u64,
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxStats {
    pub polls: u64,
    pub empty_polls: u64,
    pub packets: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStats {
    Tx { queue_id: u16, stats: TxStats },
    Rx { queue_id: u16, stats: RxStats },
}

impl EngineStats {
    fn rows(&self) -> Vec<(String, u64)> {
        match self {
            EngineStats::Tx { queue_id, stats } => vec![
                (format!("tx{} bursts", queue_id), stats.bursts),
                (format!("tx{} submitted", queue_id), stats.submitted),
                (format!("tx{} accepted", queue_id), stats.accepted),
                (format!("tx{} rejected", queue_id), stats.rejected),
                (format!("tx{} alloc shortfall", queue_id), stats.alloc_shortfall),
                (format!("tx{} tailroom drops", queue_id), stats.tailroom_drops),
            ],
            EngineStats::Rx { queue_id, stats } => vec![
                (format!("rx{} polls", queue_id), stats.polls),
                (format!("rx{} empty polls", queue_id), stats.empty_polls),
                (format!("rx{} packets", queue_id), stats.packets),
                (format!("rx{} bytes", queue_id), stats.bytes),
            ],
        }
    }
}

/// Print one table with every engine's counters and the pool occupancy.
pub fn print_stats(engines: &[EngineStats], pool: &BufPool) {
    let mut rows = Vec::new();

    for e in engines {
        for (name, value) in e.rows() {
            rows.push(vec![name.cell(), value.cell().justify(Justify::Right)]);
        }
    }

    rows.push(vec![
        "pool free".cell(),
        pool.free_count().cell().justify(Justify::Right),
    ]);
    rows.push(vec![
        "pool issued".cell(),
        pool.issued_count().cell().justify(Justify::Right),
    ]);
    rows.push(vec![
        "pool alloc failures".cell(),
        pool.alloc_failures().cell().justify(Justify::Right),
    ]);

    let table = rows
        .table()
        .title(vec!["Counter".cell().bold(true), "Value".cell().bold(true)]);

    let r = print_stdout(table);
    if let Err(err) = r {
        warn!("cannot print stats: {:?}", err);
    }
}
