pub mod analytics;
pub mod cart;
pub mod catalog;
pub mod diagnostics;
pub mod pedidos;
pub mod session;
pub mod settings;
