use crate::application::engine::EscrowView;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

/// One line of the summary export.
#[derive(Debug, Serialize)]
struct SummaryRecord {
    escrow: String,
    order: String,
    amount: String,
    currency: String,
    status: String,
    on_hold: bool,
}

/// Writes escrow summaries as CSV (`escrow,order,amount,currency,status,on_hold`).
pub struct EscrowWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> EscrowWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    /// Serializes the given escrows and flushes the underlying writer.
    pub fn write_escrows(&mut self, escrows: Vec<EscrowView>) -> Result<()> {
        for view in escrows {
            self.writer.serialize(SummaryRecord {
                escrow: view.id.to_string(),
                order: view.order_id,
                amount: format!("{:.2}", view.amount),
                currency: view.currency,
                status: view.status.as_str().to_string(),
                on_hold: view.on_hold,
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
