//! Administrative API of the print server: handler catalog and application wiring.

pub mod app;
