// Deterministic initiator selection

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Creates and sends the offer
    Initiator,
    /// Waits for the offer and answers it
    Responder,
}

/// The lexicographically smaller id initiates
///
/// Both peers run this on the same pair of ids, so they always agree.
/// Server-assigned ids are distinct; equal ids fall to `Responder`.
pub fn select_role(local_id: &str, partner_id: &str) -> Role {
    if local_id < partner_id {
        Role::Initiator
    } else {
        Role::Responder
    }
}
