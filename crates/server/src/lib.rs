//! Process wiring for the product service.

pub mod app;
