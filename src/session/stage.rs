// Session stage state machine values

/// Where the pairing lifecycle currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Channel requested or open, no partner yet
    Connecting,
    /// Partner assigned, chat enabled
    Active,
    /// User pressed stop once; nothing sent yet
    ConfirmDisconnect,
    /// Idle until the user starts a new cycle
    Disconnected,
}

impl Stage {
    /// Whether the edge `self -> next` exists
    ///
    /// `Disconnected -> Active` covers a late pairing on a channel that is
    /// still open (the server answers "no partner" first and pairs later).
    /// `ConfirmDisconnect -> Active` is the user carrying on chatting.
    pub fn can_transition_to(self, next: Stage) -> bool {
        use Stage::*;
        matches!(
            (self, next),
            (Connecting, Active)
                | (Connecting, Disconnected)
                | (Active, ConfirmDisconnect)
                | (Active, Disconnected)
                | (ConfirmDisconnect, Active)
                | (ConfirmDisconnect, Disconnected)
                | (Disconnected, Connecting)
                | (Disconnected, Active)
        )
    }

    /// Chat traffic is accepted in these stages
    pub fn is_chatting(self) -> bool {
        matches!(self, Stage::Active | Stage::ConfirmDisconnect)
    }
}
