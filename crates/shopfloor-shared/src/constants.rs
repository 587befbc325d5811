/// Separator between the two sorted participant ids of a DM channel id.
/// User ids never contain it, which keeps the derived id collision-free.
pub const DM_ID_SEPARATOR: char = '_';

/// Separator between channel and user id in a typing-status document id.
pub const TYPING_ID_SEPARATOR: char = ':';

/// Default lifetime of a typing indicator without a refresh (5 s).
pub const DEFAULT_TYPING_TTL_MS: u64 = 5_000;

/// Default maximum message length in characters.
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 4_000;

/// Maximum length of a channel or category name.
pub const MAX_NAME_LEN: usize = 64;

/// Length of the preview kept in a DM channel's `lastMessage`.
pub const LAST_MESSAGE_PREVIEW_LEN: usize = 120;
