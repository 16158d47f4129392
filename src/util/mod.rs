pub mod checksum;
pub mod cursor;

pub use cursor::ByteCursor;
pub use cursor::Underrun;
