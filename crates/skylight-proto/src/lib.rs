//! Document model for assignment creation.
//! Kept in a dedicated crate so the splitter, the REST client and tooling can
//! share the same shapes without pulling in the HTTP or messaging runtime.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Top-level document submitted to the assignments API. The server assigns the
/// identifier; `root_sequence` names the sequence shown first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentNew {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration_id: Option<String>,
    pub root_sequence: String,
    #[serde(default)]
    pub confirm_captures: bool,
    #[serde(default)]
    pub sequences: Vec<SequenceNew>,
}

impl AssignmentNew {
    pub fn new(name: impl Into<String>, root_sequence: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            assigned_to: None,
            integration_id: None,
            root_sequence: root_sequence.into(),
            confirm_captures: false,
            sequences: Vec::new(),
        }
    }

    /// Appends a sequence and hands back a mutable reference so cards can be
    /// added in place.
    pub fn add_sequence(&mut self, sequence: SequenceNew) -> &mut SequenceNew {
        self.sequences.push(sequence);
        let last = self.sequences.len() - 1;
        &mut self.sequences[last]
    }

    /// Removes every sequence, leaving the assignment shell behind.
    pub fn take_sequences(&mut self) -> Vec<SequenceNew> {
        std::mem::take(&mut self.sequences)
    }

    pub fn card_count(&self) -> usize {
        self.sequences.iter().map(|sequence| sequence.cards.len()).sum()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ViewMode {
    #[default]
    Native,
    Gallery,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceNew {
    pub id: String,
    #[serde(default)]
    pub view_mode: ViewMode,
    #[serde(default)]
    pub cards: Vec<CardNew>,
}

impl SequenceNew {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            view_mode: ViewMode::Native,
            cards: Vec::new(),
        }
    }

    /// Appends a card and re-numbers positions so they follow list order.
    pub fn add_card(&mut self, card: CardNew) -> &mut CardNew {
        self.cards.push(card);
        self.position_cards();
        let last = self.cards.len() - 1;
        &mut self.cards[last]
    }

    /// Positions are 1-indexed.
    pub fn position_cards(&mut self) {
        for (index, card) in self.cards.iter_mut().enumerate() {
            card.position = Some(index as u32 + 1);
        }
    }

    /// Removes every card, leaving the sequence shell behind.
    pub fn take_cards(&mut self) -> Vec<CardNew> {
        std::mem::take(&mut self.cards)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardNew {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
    /// Screen share taken by the card: 1, 2 or 3 (fullscreen).
    #[serde(default = "default_card_size")]
    pub size: u8,
    #[serde(default)]
    pub layout: Layout,
    #[serde(default)]
    pub component: Component,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selectable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdued: Option<bool>,
}

impl CardNew {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            header: None,
            footer: None,
            position: None,
            size: default_card_size(),
            layout: Layout::default(),
            component: Component::default(),
            selectable: None,
            subdued: None,
        }
    }

    pub fn with_component(mut self, component: Component) -> Self {
        self.component = component;
        self
    }

    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }
}

fn default_card_size() -> u8 {
    1
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TextSize {
    Small,
    #[default]
    Medium,
    Large,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "layoutType", rename_all = "camelCase")]
pub enum Layout {
    #[serde(rename_all = "camelCase")]
    Text {
        #[serde(default)]
        text: String,
        #[serde(default)]
        text_size: TextSize,
    },
    #[serde(rename_all = "camelCase")]
    Image { uri: String },
}

impl Default for Layout {
    fn default() -> Self {
        Layout::Text {
            text: String::new(),
            text_size: TextSize::default(),
        }
    }
}

/// Interactive payload carried by a card. Sizes vary widely: a decision card
/// embeds its whole choice dictionary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "componentType", rename_all = "camelCase")]
pub enum Component {
    #[default]
    Default,
    #[serde(rename_all = "camelCase")]
    Completion {
        #[serde(default)]
        completed: bool,
    },
    #[serde(rename_all = "camelCase")]
    Decision {
        #[serde(default)]
        choices: BTreeMap<String, Choice>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        include_cancel: Option<bool>,
    },
    #[serde(rename_all = "camelCase")]
    CapturePhoto {
        #[serde(default)]
        captures: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    OpenSequence { sequence_id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Choice {
    pub label: String,
    pub position: u32,
    #[serde(default)]
    pub selected: bool,
}

/// Assignment as returned by the API. Only the fields tooling reads are
/// modelled; the server adds bookkeeping fields that are ignored here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub integration_id: Option<String>,
    #[serde(default)]
    pub root_sequence: Option<String>,
    #[serde(default)]
    pub is_complete: bool,
}

/// Identity returned by the API for a created assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentIdentity {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceIdentity {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardIdentity {
    pub id: String,
}
