use std::io::Write;

use anyhow::Result;
use serde::Serialize;
use torchstack_core::model::MemoryBlock;
use torchstack_core::{ExportOptions, TraceSession};
use torchstack_protocol::MemoryBlockRecord;

/// One folded line per leaf, newline terminated.
pub fn write_folded(out: &mut impl Write, session: &TraceSession, options: &ExportOptions) -> Result<()> {
    for line in session.folded_lines(options) {
        writeln!(out, "{line}")?;
    }
    Ok(())
}

pub fn write_leaves(out: &mut impl Write, session: &TraceSession, options: &ExportOptions) -> Result<()> {
    write_json(out, &session.leaf_records(options))
}

pub fn write_memory(out: &mut impl Write, session: &TraceSession, unfreed_only: bool) -> Result<()> {
    let records: Vec<MemoryBlockRecord> = if unfreed_only {
        session.memory().unfreed_blocks().map(MemoryBlock::to_record).collect()
    } else {
        session.memory().blocks().map(MemoryBlock::to_record).collect()
    };
    write_json(out, &records)
}

fn write_json<T: Serialize + ?Sized>(out: &mut impl Write, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}
