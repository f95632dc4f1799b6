pub mod history;
pub mod models;
pub mod raw_files;
pub mod wide_table;
