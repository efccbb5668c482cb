//! Authentication against Microsoft Entra ID

pub mod access_token;
pub mod credential;
