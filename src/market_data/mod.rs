// Market data module entrypoint
pub mod adapters;       // venue feeds (simulated random walk)
pub mod normaliser;     // snaps prices/volumes to tick and lot steps
pub mod external_book;  // in-memory depth of an external instrument
pub mod reference;      // reference price feed for the ladder
pub mod router;         // wires feed, engine and paper venue for the demo
