//! Communication events recorded against a profile.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::resource::{Resource, ResourceRecord};

pub const COMMUNICATIONS_PATH: &str = "/api/communications";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CommunicationType {
  Email,
  Call,
  Meeting,
  Sms,
  Note,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
  Inbound,
  Outbound,
}

/// A communication as stored by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Communication {
  pub id: u64,
  /// Owning profile
  pub profile_id: String,
  #[serde(rename = "type")]
  pub kind: CommunicationType,
  #[serde(default)]
  pub direction: Option<Direction>,
  #[serde(default)]
  pub subject: Option<String>,
  #[serde(default)]
  pub content: Option<String>,
  pub created_at: DateTime<Utc>,
}

/// Create payload. `id`, `profileId` and `createdAt` are assigned by the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCommunication {
  #[serde(rename = "type")]
  pub kind: CommunicationType,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub direction: Option<Direction>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub subject: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub content: Option<String>,
}

impl NewCommunication {
  pub fn new(kind: CommunicationType) -> Self {
    Self {
      kind,
      direction: None,
      subject: None,
      content: None,
    }
  }

  pub fn direction(mut self, direction: Direction) -> Self {
    self.direction = Some(direction);
    self
  }

  pub fn subject(mut self, subject: impl Into<String>) -> Self {
    self.subject = Some(subject.into());
    self
  }

  pub fn content(mut self, content: impl Into<String>) -> Self {
    self.content = Some(content.into());
    self
  }
}

impl ResourceRecord for Communication {
  type Create = NewCommunication;
  const PATH: &'static str = COMMUNICATIONS_PATH;
}

/// Resource handle for `/api/communications`.
pub type Communications<C> = Resource<Communication, C>;

impl fmt::Display for CommunicationType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      CommunicationType::Email => "email",
      CommunicationType::Call => "call",
      CommunicationType::Meeting => "meeting",
      CommunicationType::Sms => "sms",
      CommunicationType::Note => "note",
    };
    f.write_str(s)
  }
}

impl fmt::Display for Direction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Direction::Inbound => "inbound",
      Direction::Outbound => "outbound",
    })
  }
}
