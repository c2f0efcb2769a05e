mod dag_reader;

pub use dag_reader::*;
