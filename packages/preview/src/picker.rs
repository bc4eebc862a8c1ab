// ABOUTME: Message protocol between the injected picker script and the host frame
// ABOUTME: Messages are JSON objects discriminated by a kebab-case `type` field

use serde::{Deserialize, Serialize};

/// Element description posted when the user picks a component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedComponent {
    pub tag_name: String,
    pub selector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub class_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_line: Option<u32>,
}

/// Messages the picker posts to its host frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PickerEvent {
    PickerReady,
    ComponentSelected { component: SelectedComponent },
    PickerCancelled,
    PickerError { message: String },
    PickerLoadError { message: String },
}

/// Messages the host frame posts to the picker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PickerCommand {
    ActivatePicker,
    DeactivatePicker,
}

impl PickerEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PickerEvent::PickerReady)
    }
}
