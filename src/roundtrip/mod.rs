//! Round-trip fidelity layer: export project segments into an external
//! bilingual document, accept the externally edited copy back, and verify
//! that segment identity and inline tags survived the trip.
//!
//! The module is split into:
//!
//! * `placeholder` - the per-session table pairing internal tag payloads
//!   with the placeholder tokens a translator sees and moves around.
//! * `mapper` - export and reimport over any [`ExternalFormat`], producing
//!   the reconciliation report.
//! * `tabular` - the built-in tabular (CSV) bilingual format.

mod mapper;
mod placeholder;
mod tabular;

pub use mapper::{
    export_units, reimport_units, ExternalFormat, ExternalUnit, RoundTripError, RoundTripIssue,
    RoundTripReport,
};
pub use placeholder::PlaceholderMap;
pub use tabular::TabularBilingual;
