pub mod directory_store;
pub mod output_writer;
