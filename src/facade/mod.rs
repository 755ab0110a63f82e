mod provider;
mod table;

pub use provider::Provider;
pub use table::Table;
