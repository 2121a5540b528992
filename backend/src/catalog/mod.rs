//! Translations, geography and development listings

pub mod model;
pub mod service;

pub use model::*;
pub use service::CatalogService;
