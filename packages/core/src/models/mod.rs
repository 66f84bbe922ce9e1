//! Data Models
//!
//! Value objects shared by every layer:
//!
//! - [`Value`] / [`Row`] - scalar column values and persisted rows
//! - [`Range`] / [`DateRange`] - clamped intervals
//! - [`FilterStringField`] / [`Matching`] - string comparison directives
//! - Filter hierarchy ([`PageableFilter`], [`IdentifiableEntityFilter`],
//!   [`AuditableEntityFilter`])
//! - [`Entity`] / [`AuditableEntity`] - the persisted-type contract
//! - [`Locale`] - case folding
//! - [`adapters`] - text and JSON encodings at the boundary

pub mod adapters;
mod entity;
mod filter;
mod locale;
mod range;
pub mod time;
mod value;

pub use adapters::FormatError;
pub use entity::{Auditable, AuditableEntity, Entity, RowExt, ID_COLUMN, VERSION_COLUMN};
pub use filter::{
    AuditableEntityFilter, Filter, FilterStringField, IdentifiableEntityFilter, Matching,
    PageableFilter,
};
pub use locale::Locale;
pub use range::{DateRange, Range};
pub use value::{format_timestamp, parse_timestamp, Row, Value};
