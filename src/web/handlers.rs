pub mod bindings;
pub mod health;
