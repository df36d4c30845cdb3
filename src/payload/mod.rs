//! Client-facing request and response bodies for `POST /process`.

use serde::{Deserialize, Deserializer, Serialize};

use crate::intent::Intent;

/// One icon on the user's desktop. Folders carry their contents in `docs`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftwareInfo {
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(rename = "type", deserialize_with = "null_as_default")]
    pub kind: String,
    #[serde(deserialize_with = "null_as_default")]
    pub docs: Vec<SoftwareInfo>,
}

/// The body the desktop client posts.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserRequest {
    #[serde(deserialize_with = "null_as_default")]
    pub input: String,
    /// Wire code: 0 chat, 1 organize, 2 image.
    #[serde(rename = "type", deserialize_with = "null_as_default")]
    pub kind: i64,
    /// Grid the desktop can hold, e.g. `"8*12"`.
    #[serde(deserialize_with = "null_as_default")]
    pub software_layout: String,
    /// Passed to the image provider as the wallpaper size, e.g. `"1920*1080"`.
    #[serde(deserialize_with = "null_as_default")]
    pub screen_resolution: String,
    #[serde(deserialize_with = "null_as_default")]
    pub software_info: Vec<SoftwareInfo>,
    /// System prompt for chat requests.
    #[serde(deserialize_with = "null_as_default")]
    pub prompt: String,
}

// Clients written against Go send `null` for empty slices and strings.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl UserRequest {
    /// The intent the client asked for, before keyword classification.
    pub fn requested_intent(&self) -> Option<Intent> {
        Intent::from_code(self.kind)
    }

    /// The user message sent to the chat model.
    ///
    /// The desktop inventory is rendered as JSON so nested folders survive.
    pub fn chat_message(&self) -> String {
        let software_info =
            serde_json::to_string(&self.software_info).unwrap_or_else(|_| "[]".to_owned());
        format!(
            "Input: {}\nSoftwareInfo: {}\nSoftwareLayout: {}",
            self.input, software_info, self.software_layout
        )
    }
}

/// The body returned for every successful request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserResponse {
    pub output: String,
}

impl UserResponse {
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
        }
    }
}
