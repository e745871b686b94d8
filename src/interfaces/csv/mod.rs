pub mod escrow_writer;
pub mod seed_reader;
