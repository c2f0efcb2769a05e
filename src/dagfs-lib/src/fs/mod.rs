mod dir;
mod file;
mod path;

pub use dir::*;
pub use file::*;
pub use path::*;

#[cfg(test)]
mod test_fs;
