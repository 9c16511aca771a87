// Conversation log for one pairing

/// One entry in the conversation, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatMessage {
    Text {
        text: String,
        sender: String,
        display_name: String,
        timestamp: String,
    },
    Image {
        image_data: String,
        sender: String,
        display_name: String,
        timestamp: String,
    },
    /// The partner asked us for an image
    ImageRequestReceived {
        sender: String,
        display_name: String,
        timestamp: String,
    },
    /// We asked the partner for an image
    ImageRequestSent { timestamp: String },
}

impl ChatMessage {
    pub fn sender(&self) -> Option<&str> {
        match self {
            ChatMessage::Text { sender, .. }
            | ChatMessage::Image { sender, .. }
            | ChatMessage::ImageRequestReceived { sender, .. } => Some(sender),
            ChatMessage::ImageRequestSent { .. } => None,
        }
    }

    /// Whether this entry was written by `identity`
    ///
    /// Without a bound identity nothing counts as ours except our own requests.
    pub fn is_own(&self, identity: Option<&str>) -> bool {
        match (self, identity) {
            (ChatMessage::ImageRequestSent { .. }, _) => true,
            (_, None) => false,
            (message, Some(me)) => message.sender() == Some(me),
        }
    }

    /// Author label as rendered next to the entry
    pub fn author_label(&self, identity: Option<&str>) -> String {
        if self.is_own(identity) {
            return "ME".to_string();
        }
        match self {
            ChatMessage::Text { display_name, .. }
            | ChatMessage::Image { display_name, .. }
            | ChatMessage::ImageRequestReceived { display_name, .. }
                if !display_name.is_empty() =>
            {
                display_name.to_uppercase()
            }
            _ => "STRANGER".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conversation {
    entries: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.entries.push(message);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drop every pending "send me an image" prompt
    pub fn remove_received_image_requests(&mut self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|m| !matches!(m, ChatMessage::ImageRequestReceived { .. }));
        before - self.entries.len()
    }

    pub fn entries(&self) -> &[ChatMessage] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChatMessage> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
