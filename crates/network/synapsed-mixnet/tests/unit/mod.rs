//! Unit test modules.

mod mix_properties;
mod onion_properties;
