pub mod types; // orders, reports, gateway trait
pub mod book;  // paper venue used by the demo and tests
