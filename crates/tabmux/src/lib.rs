//! Top-level facade crate for tabmux.
//!
//! Re-exports the protocol core and the broker library so users can depend
//! on a single crate.

pub mod core {
    pub use tabmux_core::*;
}

pub mod broker {
    pub use tabmux_broker::*;
}
