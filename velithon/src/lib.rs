//! VELITHON — an RSGI-style async web framework core.
//!
//! This facade crate re-exports [`velithon_core`] and, with the `vsp`
//! feature, [`velithon_vsp`] through a single dependency. Import the
//! everyday surface with:
//!
//! ```ignore
//! use velithon::prelude::*;
//! ```
//!
//! # Feature flags
//!
//! | Feature      | Default | Enables                                   |
//! |--------------|---------|--------------------------------------------|
//! | `validation` | **yes** | `ValidationErrorFormatter` and friends      |
//! | `multipart`  | no      | `file`/`UploadedFile` handler parameters    |
//! | `vsp`        | no      | the `velithon-vsp` RPC transport            |
//! | `dev-reload` | no      | the `DevReload` plugin (never for prod)     |
//! | `full`       | no      | `multipart` + `validation` + `vsp`          |

// Re-exported as a public extern crate (not just `pub use ::*`) so
// `proc-macro-crate`'s `crate_name("velithon")` lookup in
// `velithon-macros::crate_path` can resolve `velithon::velithon_core` for
// applications that depend on this facade instead of `velithon-core`
// directly.
pub extern crate velithon_core;
pub extern crate velithon_macros;

#[cfg(feature = "vsp")]
pub extern crate velithon_vsp;

pub use velithon_core::*;

/// Unified prelude — `use velithon::prelude::*` for the everyday surface.
pub mod prelude {
    pub use velithon_core::prelude::*;

    #[cfg(feature = "vsp")]
    pub use velithon_vsp::prelude::*;
}
