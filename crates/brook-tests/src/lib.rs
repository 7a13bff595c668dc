//! Integration test suite for brook.
//!
//! `tests/e2e.rs` drives the wallet engine against an in-process ledger
//! that behaves like an Esplora instance; `tests/properties.rs` checks the
//! engine's invariants under generated inputs.

pub mod helpers;
