//! Built-in bulk actions

pub mod legal_hold;
pub mod set_properties;

pub use legal_hold::LegalHoldAction;
pub use set_properties::SetPropertiesAction;

/// Permission names checked by the built-in actions
pub mod permissions {
    pub const WRITE: &str = "Write";
    pub const MANAGE_LEGAL_HOLD: &str = "ManageLegalHold";
}
