/// Telegram user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UserId(pub i64);

/// Telegram chat id (numeric). Positive for private chats, negative for groups.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChatId(pub i64);

/// Telegram message id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageId(pub i32);

/// A stable reference to a Telegram message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

/// Upstream search session id (string), as reported by the API.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(pub String);

/// Access tier for a search request.
///
/// Free is capped at a configured number of displayed/exported records;
/// Paid is uncapped (or redirected to an upstream download link).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Tier {
    Free,
    Paid,
}

impl Tier {
    /// Lowercase label used in export filenames and usage rows.
    pub fn label(self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Paid => "paid",
        }
    }

    /// Capitalized label for user-facing captions.
    pub fn title(self) -> &'static str {
        match self {
            Tier::Free => "Free",
            Tier::Paid => "Paid",
        }
    }
}
