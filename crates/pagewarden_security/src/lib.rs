//! Findings-at-rest encryption and the audited reveal path.

mod cipher;
mod revealer;

pub use cipher::{CryptoError, FindingsCipher, PayloadMeta};
pub use revealer::{RevealError, Revealer};
