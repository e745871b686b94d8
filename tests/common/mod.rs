use std::fs::File;
use std::io::Error;
use std::path::Path;

pub const SEED_HEADER: [&str; 11] = [
    "order", "buyer", "service", "provider", "company", "region", "amount", "currency", "policy",
    "status", "reference",
];

/// Writes a seed CSV with `rows` simple pending escrows (O1, O2, ...).
#[allow(dead_code)]
pub fn generate_seed_csv(path: &Path, rows: usize) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);

    wtr.write_record(SEED_HEADER)?;
    for i in 1..=rows {
        wtr.write_record([
            &format!("O{i}"),
            "Ada Lovelace",
            "Boiler installation",
            "p1",
            "c1",
            "london",
            "100.00",
            "GBP",
            "",
            "pending",
            "",
        ])?;
    }

    wtr.flush()?;
    Ok(())
}
