//! Core compiler logic: types, parsing, routing, layer compilation, assembly, rendering.

pub mod assembler;
pub mod codegen;
pub mod error;
pub mod family;
pub mod fingerprint;
pub mod layer;
pub mod parser;
pub mod registry;
pub mod router;
pub mod sublayer;
pub mod types;
