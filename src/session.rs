//! Keys the login flow stores in the cookie session.

pub const USER_ID: &str = "user_id";
