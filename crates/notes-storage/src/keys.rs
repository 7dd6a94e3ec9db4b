//! Storage key constants.

/// Keys of the persisted session, one entry per key.
pub struct StorageKeys;

impl StorageKeys {
    /// Bearer access token
    pub const ACCESS_TOKEN: &'static str = "accessToken";

    /// Refresh token
    pub const REFRESH_TOKEN: &'static str = "refreshToken";

    /// Signed-in user (JSON)
    pub const USER: &'static str = "user";

    /// Every session key; deleting all of them is a full logout.
    pub const ALL: [&'static str; 3] = [Self::ACCESS_TOKEN, Self::REFRESH_TOKEN, Self::USER];
}
