//! CAS client ticket validation core.

// Ticket validation against a CAS server
pub mod validation;

pub use validation::{
    Assertion, AttributeValue, Attributes, CasTicketValidator, Principal, Protocol,
    TicketValidator, ValidationError, ValidatorConfig,
};
