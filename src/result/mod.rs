mod result;

pub use result::ResultSet;
