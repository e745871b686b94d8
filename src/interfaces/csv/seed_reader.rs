use crate::domain::patch::CreateEscrow;
use crate::domain::ports::OrderSummary;
use crate::error::{EscrowError, Result};
use serde::Deserialize;
use serde_json::Value;
use std::io::Read;

/// One row of the seed CSV: the order/buyer/service columns feed the
/// read-model, the remaining columns feed escrow creation.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SeedRecord {
    pub order: String,
    pub buyer: String,
    pub service: String,
    pub provider: String,
    pub company: String,
    pub region: String,
    pub amount: String,
    pub currency: String,
    pub policy: String,
    pub status: String,
    pub reference: String,
}

impl SeedRecord {
    pub fn order_summary(&self) -> OrderSummary {
        OrderSummary {
            order_id: self.order.clone(),
            buyer_id: self.buyer.clone(),
            buyer_name: self.buyer.clone(),
            service_id: self.service.clone(),
            service_title: self.service.clone(),
            provider_id: non_empty(&self.provider),
            company_id: non_empty(&self.company),
            region: non_empty(&self.region),
            disputes: Vec::new(),
        }
    }

    /// The amount travels as a raw string so the engine applies its own
    /// parsing and rounding rules.
    pub fn create_command(&self) -> CreateEscrow {
        CreateEscrow {
            order_id: non_empty(&self.order),
            amount: non_empty(&self.amount).map(Value::String),
            currency: non_empty(&self.currency),
            status: non_empty(&self.status),
            policy_id: non_empty(&self.policy),
            external_reference: non_empty(&self.reference),
            ..Default::default()
        }
    }
}

fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Reads seed records from a CSV source.
///
/// Wraps `csv::Reader` and provides an iterator over `Result<SeedRecord>`,
/// trimming whitespace and tolerating short records.
pub struct SeedReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> SeedReader<R> {
    /// Creates a new `SeedReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Returns an iterator that lazily reads and deserializes seed rows, so
    /// large files stream without loading everything into memory.
    pub fn records(self) -> impl Iterator<Item = Result<SeedRecord>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(EscrowError::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "order,buyer,service,provider,company,region,amount,currency,policy,status,reference";

    #[test]
    fn test_reader_valid_stream() {
        let data = format!(
            "{HEADER}\nO1, Ada Lovelace, Boiler installation, p1, c1, london, 150.005, gbp, standard-release, pending, BANK-1\nO2,Grace Hopper,Rewiring,p2,,,80,,,,"
        );
        let reader = SeedReader::new(data.as_bytes());
        let records: Vec<Result<SeedRecord>> = reader.records().collect();
        assert_eq!(records.len(), 2);

        let first = records[0].as_ref().unwrap();
        assert_eq!(first.order, "O1");
        assert_eq!(first.buyer, "Ada Lovelace");

        let summary = first.order_summary();
        assert_eq!(summary.provider_id.as_deref(), Some("p1"));
        assert_eq!(summary.region.as_deref(), Some("london"));

        let cmd = first.create_command();
        assert_eq!(cmd.amount, Some(Value::String("150.005".into())));
        assert_eq!(cmd.currency.as_deref(), Some("gbp"));
        assert_eq!(cmd.policy_id.as_deref(), Some("standard-release"));

        let second = records[1].as_ref().unwrap().create_command();
        assert_eq!(second.currency, None);
        assert_eq!(second.status, None);
    }

    #[test]
    fn test_reader_tolerates_short_rows() {
        let data = format!("{HEADER}\nO1,Ada,Boiler");
        let reader = SeedReader::new(data.as_bytes());
        let records: Vec<Result<SeedRecord>> = reader.records().collect();
        assert_eq!(records.len(), 1);
        let record = records[0].as_ref().unwrap();
        assert_eq!(record.order, "O1");
        assert!(record.amount.is_empty());
    }
}
