use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// The participant a message belongs to. Tool results travel in user messages.
pub enum Role {
    User,
    Assistant,
}
